//! Integration tests for `LifecycleController` start / stop / restart /
//! update / shutdown against fake collaborators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use server_warden::clock::Clock;
use server_warden::models::state::ServerState;

use super::test_helpers::{wait_for, FakeProcessTable, Harness};

#[tokio::test]
async fn start_from_stopped_launches_once_and_arms_schedulers() {
    let h = Harness::new(true, true);
    assert_eq!(h.controller.state(), ServerState::Stopped);

    assert!(h.controller.start().await);

    assert_eq!(h.spawner.spawns(), 1);
    assert!(h.controller.is_running());
    assert_eq!(h.controller.state(), ServerState::Running);
    assert!(h.controller.backups().is_worker_alive());
    assert!(h.controller.restarts().is_worker_alive());
    assert!(h.controller.backups().next_fire_at().is_some());
    assert!(h.controller.restarts().next_fire_at().is_some());
    assert_eq!(h.controller.status().process_id, Some(4000));
}

#[tokio::test]
async fn start_leaves_disabled_schedulers_disarmed() {
    let h = Harness::new(false, false);

    assert!(h.controller.start().await);

    assert!(!h.controller.backups().is_worker_alive());
    assert!(!h.controller.restarts().is_worker_alive());
    assert_eq!(h.controller.backups().next_fire_at(), None);
    assert_eq!(h.controller.restarts().next_fire_at(), None);
}

#[tokio::test]
async fn start_passes_configured_arguments() {
    let h = Harness::new(false, false);

    assert!(h.controller.start().await);

    let args = h.spawner.last_args();
    assert_eq!(args[0], "-servername");
    assert!(args.contains(&"-gameport".to_owned()));
    assert!(h
        .dir
        .path()
        .join("server")
        .join("enshrouded_server.json")
        .is_file());
}

#[tokio::test]
async fn start_when_already_running_does_nothing() {
    let h = Harness::new(false, false);
    h.table.set_running(Some(77));

    assert!(!h.controller.start().await);
    assert_eq!(h.spawner.spawns(), 0);
}

#[tokio::test]
async fn start_fails_when_spawn_fails() {
    let h = Harness::new(true, false);
    h.spawner.fail(true);

    assert!(!h.controller.start().await);
    assert_eq!(h.controller.state(), ServerState::Stopped);
    assert!(!h.controller.backups().is_worker_alive());
}

#[tokio::test]
async fn start_fails_and_kills_handle_when_server_never_appears() {
    let h = Harness::new(false, false);
    h.spawner.never_appears(true);

    assert!(!h.controller.start().await);
    assert_eq!(h.spawner.spawns(), 1);
    assert_eq!(h.spawner.handle_kills(), 1);
    assert_eq!(h.controller.state(), ServerState::Stopped);
}

#[tokio::test]
async fn stop_when_stopped_returns_false_without_side_effects() {
    let h = Harness::new(true, true);

    assert!(!h.controller.stop().await);
    assert_eq!(h.table.terminations(), 0);
    assert_eq!(h.table.force_kills(), 0);
    assert_eq!(h.controller.state(), ServerState::Stopped);
}

#[tokio::test]
async fn graceful_stop_disarms_schedulers() {
    let h = Harness::new(true, true);
    assert!(h.controller.start().await);

    assert!(h.controller.stop().await);

    assert_eq!(h.table.terminations(), 1);
    assert_eq!(h.table.force_kills(), 0);
    assert!(!h.controller.is_running());
    assert_eq!(h.controller.state(), ServerState::Stopped);
    assert!(!h.controller.backups().is_worker_alive());
    assert!(!h.controller.restarts().is_worker_alive());
    assert_eq!(h.controller.status().process_id, None);
}

#[tokio::test]
async fn ignored_terminate_escalates_to_forced_kill() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);
    h.table.ignore_terminate(true);

    let started = Instant::now();
    assert!(h.controller.stop().await);
    let elapsed = started.elapsed();

    assert_eq!(h.table.terminations(), 1);
    assert_eq!(h.table.force_kills(), 1);
    assert_eq!(h.spawner.handle_kills(), 1);
    assert!(!h.controller.is_running());
    assert!(
        elapsed >= Duration::from_millis(900),
        "graceful window skipped: {elapsed:?}"
    );
    assert!(elapsed < Duration::from_secs(5), "stop took {elapsed:?}");
}

#[tokio::test]
async fn untracked_server_is_force_killed_directly() {
    let table = Arc::new(FakeProcessTable::default());
    table.set_running(Some(99));
    let h = Harness::with_table(false, false, table);

    assert!(h.controller.stop().await);
    assert_eq!(h.table.terminations(), 0);
    assert_eq!(h.table.force_kills(), 1);
}

#[tokio::test]
async fn unkillable_server_fails_stop_and_keeps_scheduling() {
    let h = Harness::new(true, false);
    assert!(h.controller.start().await);
    h.table.ignore_terminate(true);
    h.table.survive_kill(true);

    assert!(!h.controller.stop().await);

    assert!(h.controller.is_running());
    assert_eq!(h.controller.state(), ServerState::Running);
    assert!(h.controller.backups().is_worker_alive());
}

#[tokio::test]
async fn oversized_stop_timeouts_do_not_overflow() {
    let h = Harness::new(false, false);
    let mut updated = (*h.config.snapshot()).clone();
    updated.lifecycle.graceful_stop_seconds = u64::MAX;
    updated.lifecycle.shutdown_timeout_seconds = u64::MAX;
    h.config.replace(updated);

    assert!(h.controller.start().await);
    assert!(h.controller.stop().await);
    assert_eq!(h.table.force_kills(), 0);
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn oversized_shutdown_timeout_still_escalates() {
    let h = Harness::new(false, false);
    let mut updated = (*h.config.snapshot()).clone();
    updated.lifecycle.shutdown_timeout_seconds = u64::MAX;
    h.config.replace(updated);
    assert!(h.controller.start().await);
    h.table.ignore_terminate(true);

    assert!(h.controller.stop().await);
    assert_eq!(h.table.force_kills(), 1);
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn restart_cycles_the_server() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);

    assert!(h.controller.restart().await);

    assert_eq!(h.table.terminations(), 1);
    assert_eq!(h.spawner.spawns(), 2);
    assert!(h.controller.is_running());
    assert_eq!(h.controller.status().process_id, Some(4001));
}

#[tokio::test]
async fn restart_from_stopped_just_starts() {
    let h = Harness::new(false, false);

    assert!(h.controller.restart().await);
    assert_eq!(h.table.terminations(), 0);
    assert_eq!(h.spawner.spawns(), 1);
}

#[tokio::test]
async fn restart_result_follows_the_start() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);
    h.spawner.fail(true);

    assert!(!h.controller.restart().await);
    assert!(!h.controller.is_running());
    assert_eq!(h.controller.state(), ServerState::Stopped);
}

#[tokio::test]
async fn restart_still_starts_after_failed_stop() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);
    h.table.ignore_terminate(true);
    h.table.survive_kill(true);

    // The stubborn server is still up, so the start half is refused.
    assert!(!h.controller.restart().await);
    assert_eq!(h.spawner.spawns(), 1);
    assert!(h.controller.is_running());
}

#[tokio::test]
async fn update_stops_the_server_first() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);

    assert!(h.controller.update().await);

    assert_eq!(h.updater.calls(), 1);
    assert!(!h.updater.ran_while_running());
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn update_aborts_when_stop_fails() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);
    h.table.ignore_terminate(true);
    h.table.survive_kill(true);

    assert!(!h.controller.update().await);
    assert_eq!(h.updater.calls(), 0);
}

#[tokio::test]
async fn update_failure_is_reported() {
    let h = Harness::new(false, false);
    h.updater.fail(true);

    assert!(!h.controller.update().await);
    assert_eq!(h.updater.calls(), 1);
}

#[tokio::test]
async fn scheduled_restart_cycles_the_server() {
    let h = Harness::new(false, true);
    assert!(h.controller.start().await);

    h.clock.advance(Duration::from_secs(3601));

    assert!(
        wait_for(Duration::from_secs(5), || h.spawner.spawns() == 2).await,
        "scheduled restart never relaunched the server"
    );
    assert!(
        wait_for(Duration::from_secs(2), || h.controller.restarts().is_worker_alive()).await,
        "restart scheduler not re-armed after restart"
    );
    let next = h.controller.restarts().next_fire_at().expect("scheduled");
    assert!(next > h.clock.now());
}

#[tokio::test]
async fn server_exit_disarms_backup_worker() {
    let h = Harness::new(true, false);
    assert!(h.controller.start().await);

    // Crash: the process disappears without the controller's help.
    h.table.set_running(None);

    assert!(
        wait_for(Duration::from_secs(4), || !h.controller.backups().is_worker_alive()).await,
        "backup worker kept running after the server exited"
    );
    assert_eq!(h.controller.status().state, ServerState::Stopped);
}

#[tokio::test]
async fn status_reports_version_from_server_log() {
    let h = Harness::new(false, false);
    let logs = h.dir.path().join("server").join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(
        logs.join("enshrouded_server.log"),
        "[Session] boot\n[Session] Game Version (SVN): 571244\n",
    )
    .unwrap();

    assert_eq!(h.controller.status().version, "571244");
}

#[tokio::test]
async fn status_reports_newest_backup() {
    let h = Harness::new(false, false);
    let backups = h.dir.path().join("backups");
    std::fs::create_dir_all(&backups).unwrap();
    for name in [
        "enshrouded_backup_20240101_090000.zip",
        "enshrouded_backup_20240101_110000.zip",
        "enshrouded_backup_garbage.zip",
    ] {
        std::fs::write(backups.join(name), b"zip").unwrap();
    }

    let latest = h.controller.status().latest_backup.expect("newest archive");

    assert_eq!(latest.to_string(), "2024-01-01 11:00:00");
}

#[tokio::test]
async fn status_reports_unknown_version_without_log() {
    let h = Harness::new(false, false);
    assert_eq!(h.controller.status().version, "Unknown");
}

#[tokio::test]
async fn adopt_running_arms_schedulers_for_existing_server() {
    let table = Arc::new(FakeProcessTable::default());
    table.set_running(Some(1234));
    let h = Harness::with_table(true, true, table);
    assert_eq!(h.controller.state(), ServerState::Running);

    assert!(h.controller.adopt_running());

    assert_eq!(h.spawner.spawns(), 0);
    assert!(h.controller.backups().is_worker_alive());
    assert!(h.controller.restarts().is_worker_alive());
}

#[tokio::test]
async fn adopt_running_without_server_is_noop() {
    let h = Harness::new(true, true);

    assert!(!h.controller.adopt_running());
    assert!(!h.controller.backups().is_worker_alive());
}

#[tokio::test]
async fn apply_config_disabling_backups_clears_schedule() {
    let h = Harness::new(true, false);
    assert!(h.controller.start().await);
    assert!(h.controller.backups().is_worker_alive());

    let mut updated = (*h.config.snapshot()).clone();
    updated.auto_backup.enabled = false;
    h.controller.apply_config(updated).await;

    assert_eq!(h.controller.backups().next_fire_at(), None);
    assert!(!h.controller.backups().is_worker_alive());
}

#[tokio::test]
async fn apply_config_enabling_restarts_arms_running_server() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);

    let mut updated = (*h.config.snapshot()).clone();
    updated.auto_restart.enabled = true;
    h.controller.apply_config(updated).await;

    assert!(h.controller.restarts().next_fire_at().is_some());
    assert!(h.controller.restarts().is_worker_alive());
}

#[tokio::test]
async fn apply_config_with_unrelated_edit_keeps_pending_schedules() {
    let h = Harness::new(true, true);
    assert!(h.controller.start().await);
    let backup_due = h.controller.backups().next_fire_at();
    let restart_due = h.controller.restarts().next_fire_at();
    h.clock.advance(Duration::from_secs(59 * 60));

    let mut updated = (*h.config.snapshot()).clone();
    updated.server.name = "Renamed Server".into();
    h.controller.apply_config(updated).await;

    assert_eq!(h.controller.backups().next_fire_at(), backup_due);
    assert_eq!(h.controller.restarts().next_fire_at(), restart_due);
    assert!(h.controller.backups().is_worker_alive());
    assert!(h.controller.restarts().is_worker_alive());
}

#[tokio::test]
async fn shutdown_stops_server_and_takes_final_backup() {
    let h = Harness::new(true, true);
    assert!(h.controller.start().await);
    let event = h.controller.shutdown_event();

    h.controller.shutdown().await;

    assert!(!h.table.running());
    assert_eq!(h.backup.calls(), 1);
    assert!(event.is_cancelled());
    assert!(!h.controller.backups().is_worker_alive());
    assert!(!h.controller.restarts().is_worker_alive());
}

#[tokio::test]
async fn shutdown_without_running_server_skips_backup() {
    let h = Harness::new(true, false);

    h.controller.shutdown().await;

    assert_eq!(h.backup.calls(), 0);
    assert!(h.controller.shutdown_event().is_cancelled());
}

#[tokio::test]
async fn shutdown_backup_respects_configuration() {
    let h = Harness::new(false, false);
    let mut updated = (*h.config.snapshot()).clone();
    updated.auto_backup.backup_on_shutdown = false;
    h.controller.apply_config(updated).await;
    assert!(h.controller.start().await);

    h.controller.shutdown().await;

    assert_eq!(h.backup.calls(), 0);
    assert!(!h.table.running());
}

#[tokio::test]
async fn shutdown_runs_once_and_refuses_later_starts() {
    let h = Harness::new(true, false);
    assert!(h.controller.start().await);

    h.controller.shutdown().await;
    h.controller.shutdown().await;

    assert_eq!(h.backup.calls(), 1);
    assert!(!h.controller.start().await);
    assert_eq!(h.spawner.spawns(), 1);
}

#[tokio::test]
async fn failing_process_query_reads_as_not_running() {
    let h = Harness::new(false, false);
    assert!(h.controller.start().await);
    h.table.fail_queries(true);

    assert!(!h.controller.is_running());
    assert!(!h.controller.stop().await);
}
