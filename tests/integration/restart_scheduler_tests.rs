//! Integration tests for `RestartScheduler`: disabled schedules, the
//! warning window, forced restarts, and retry after a failed restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use server_warden::clock::Clock;
use server_warden::config::{ConfigHandle, GlobalConfig};
use server_warden::orchestrator::restart_scheduler::RestartScheduler;

use super::test_helpers::{
    base_time, test_config, wait_for, weak_lifecycle, FakeLifecycle, ManualClock,
};

struct Fixture {
    _dir: tempfile::TempDir,
    config: ConfigHandle,
    clock: Arc<ManualClock>,
    lifecycle: Arc<FakeLifecycle>,
    scheduler: RestartScheduler,
}

fn fixture_with(edit: impl FnOnce(&mut GlobalConfig)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), false, true);
    edit(&mut config);
    let config = ConfigHandle::new(config);
    let clock = Arc::new(ManualClock::new(base_time()));
    let lifecycle = FakeLifecycle::running();
    let scheduler = RestartScheduler::new(
        config.clone(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        weak_lifecycle(&lifecycle),
    );
    Fixture {
        _dir: dir,
        config,
        clock,
        lifecycle,
        scheduler,
    }
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn disabled_restarts_never_schedule_or_fire() {
    let f = fixture_with(|config| config.auto_restart.enabled = false);

    assert_eq!(f.scheduler.next_fire_at(), None);
    assert!(!f.scheduler.arm());

    f.clock.advance(HOUR * 48);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(f.scheduler.next_fire_at(), None);
    assert_eq!(f.lifecycle.restarts(), 0);
    assert!(!f.scheduler.state().running);
}

#[tokio::test]
async fn due_restart_fires_and_reschedules() {
    let f = fixture();
    assert!(f.scheduler.arm());
    assert!(f.scheduler.state().running);

    f.clock.advance(HOUR + Duration::from_secs(1));

    assert!(wait_for(Duration::from_secs(3), || f.lifecycle.restarts() == 1).await);
    assert!(
        wait_for(Duration::from_secs(1), || {
            f.scheduler.next_fire_at() == Some(f.clock.now() + TimeDelta::hours(1))
        })
        .await
    );
}

#[tokio::test]
async fn failed_restart_retries_after_short_delay() {
    let f = fixture();
    f.lifecycle.restart_succeeds(false);
    assert!(f.scheduler.arm());

    f.clock.advance(HOUR + Duration::from_secs(1));

    assert!(wait_for(Duration::from_secs(3), || f.lifecycle.restarts() == 1).await);
    assert!(
        wait_for(Duration::from_secs(1), || {
            f.scheduler.next_fire_at() == Some(f.clock.now() + TimeDelta::minutes(1))
        })
        .await
    );
}

#[tokio::test]
async fn disarm_during_warning_window_cancels_restart() {
    let f = fixture_with(|config| config.auto_restart.warning_minutes = 1);
    assert!(f.scheduler.arm());

    // Inside the one-minute warning window, before the restart itself.
    f.clock.advance(HOUR - Duration::from_secs(30));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    f.scheduler.disarm();
    f.scheduler.shutdown(Duration::from_secs(2)).await;

    assert!(!f.scheduler.is_worker_alive());
    assert_eq!(f.lifecycle.restarts(), 0);
}

#[tokio::test]
async fn force_restart_skips_the_warning_window() {
    let f = fixture_with(|config| config.auto_restart.warning_minutes = 5);
    f.clock.advance(Duration::from_secs(600));

    assert!(f.scheduler.force_restart().await);

    assert_eq!(f.lifecycle.restarts(), 1);
    assert_eq!(
        f.scheduler.next_fire_at(),
        Some(f.clock.now() + TimeDelta::hours(1))
    );
}

#[tokio::test]
async fn failed_force_restart_leaves_schedule_alone() {
    let f = fixture_with(|config| config.auto_restart.warning_minutes = 5);
    f.lifecycle.restart_succeeds(false);
    let before = f.scheduler.next_fire_at();

    assert!(!f.scheduler.force_restart().await);

    assert_eq!(f.lifecycle.restarts(), 1);
    assert_eq!(f.scheduler.next_fire_at(), before);
}

#[tokio::test]
async fn force_restart_with_feature_disabled_keeps_schedule_empty() {
    let f = fixture_with(|config| config.auto_restart.enabled = false);

    assert!(f.scheduler.force_restart().await);

    assert_eq!(f.lifecycle.restarts(), 1);
    assert_eq!(f.scheduler.next_fire_at(), None);
}

#[tokio::test]
async fn worker_exits_once_server_stops() {
    let f = fixture();
    assert!(f.scheduler.arm());

    f.lifecycle.set_running(false);

    assert!(wait_for(Duration::from_secs(3), || !f.scheduler.is_worker_alive()).await);
    assert_eq!(f.lifecycle.restarts(), 0);
}

#[tokio::test]
async fn resync_disable_clears_schedule_and_joins_worker() {
    let f = fixture();
    assert!(f.scheduler.arm());

    let mut updated = (*f.config.snapshot()).clone();
    updated.auto_restart.enabled = false;
    f.config.replace(updated);
    f.scheduler.resync(Duration::from_secs(2)).await;

    assert_eq!(f.scheduler.next_fire_at(), None);
    assert!(!f.scheduler.is_worker_alive());
}

#[tokio::test]
async fn resync_without_interval_change_keeps_pending_restart() {
    let f = fixture();
    assert!(f.scheduler.arm());
    let due = f.scheduler.next_fire_at();
    f.clock.advance(Duration::from_secs(59 * 60));

    let mut updated = (*f.config.snapshot()).clone();
    updated.server.name = "Renamed Server".into();
    updated.auto_restart.warning_minutes = 1;
    f.config.replace(updated);
    f.scheduler.resync(Duration::from_secs(2)).await;

    assert_eq!(f.scheduler.next_fire_at(), due);
    f.scheduler.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn resync_with_new_interval_reschedules_from_now() {
    let f = fixture();
    assert!(f.scheduler.arm());
    f.clock.advance(Duration::from_secs(600));

    let mut updated = (*f.config.snapshot()).clone();
    updated.auto_restart.interval_hours = 6;
    f.config.replace(updated);
    f.scheduler.resync(Duration::from_secs(2)).await;

    assert_eq!(
        f.scheduler.next_fire_at(),
        Some(f.clock.now() + TimeDelta::hours(6))
    );
    assert!(f.scheduler.is_worker_alive());
    f.scheduler.shutdown(Duration::from_secs(2)).await;
}
