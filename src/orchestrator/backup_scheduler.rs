//! Periodic backups while the server is running.
//!
//! The worker ticks every `scheduler_tick` and, once `next_fire_at` has
//! passed, asks the [`BackupProducer`] for an archive. A failed backup is
//! retried after the short retry delay instead of the full interval. Aged
//! archives are pruned at most once per day, just before a scheduled
//! backup fires.
//!
//! A pause gate (open by default) holds the worker at the top of each
//! iteration. [`BackupScheduler::force_backup`] ignores the gate.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::scheduler::WorkerSlot;
use super::ServerLifecycle;
use crate::backup::retention;
use crate::backup::BackupProducer;
use crate::clock::Clock;
use crate::config::{ConfigHandle, GlobalConfig};
use crate::models::schedule::{after, is_stale, SchedulerState};

const PRUNE_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backup scheduler owned by the lifecycle controller.
pub struct BackupScheduler {
    shared: Arc<Shared>,
    slot: WorkerSlot,
}

struct Shared {
    config: ConfigHandle,
    producer: Arc<dyn BackupProducer>,
    clock: Arc<dyn Clock>,
    lifecycle: Weak<dyn ServerLifecycle>,
    next_fire_at: Mutex<Option<DateTime<Local>>>,
    /// Interval the current schedule was computed with.
    applied_interval: Mutex<Duration>,
    last_prune: Mutex<Option<DateTime<Local>>>,
    /// `true` while backups may proceed.
    gate: watch::Sender<bool>,
}

impl BackupScheduler {
    /// Create a disarmed scheduler.
    ///
    /// `next_fire_at` starts as `now + interval` when auto-backup is
    /// enabled and `None` otherwise.
    #[must_use]
    pub fn new(
        config: ConfigHandle,
        producer: Arc<dyn BackupProducer>,
        clock: Arc<dyn Clock>,
        lifecycle: Weak<dyn ServerLifecycle>,
    ) -> Self {
        let snapshot = config.snapshot();
        let next = snapshot
            .auto_backup
            .enabled
            .then(|| after(clock.now(), interval(&snapshot)));
        let (gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                config,
                producer,
                clock,
                lifecycle,
                next_fire_at: Mutex::new(next),
                applied_interval: Mutex::new(interval(&snapshot)),
                last_prune: Mutex::new(None),
                gate,
            }),
            slot: WorkerSlot::new("backup"),
        }
    }

    /// Start the worker.
    ///
    /// Returns `false` without side effects when auto-backup is disabled or
    /// the server is not running. A stale or missing `next_fire_at` is
    /// recomputed from now.
    pub fn arm(&self) -> bool {
        let config = self.shared.config.snapshot();
        if !config.auto_backup.enabled {
            debug!("auto-backup disabled; not arming");
            return false;
        }
        if !self.shared.server_running() {
            info!("server not running; backup scheduler stays disarmed");
            return false;
        }

        let now = self.shared.clock.now();
        {
            let mut next = self.shared.lock_next();
            if is_stale(*next, now) {
                *next = Some(after(now, interval(&config)));
            }
        }

        let shared = Arc::clone(&self.shared);
        if self.slot.spawn(move |cancel| shared.run(cancel)) {
            info!(next_fire_at = ?self.next_fire_at(), "backup scheduler armed");
        }
        true
    }

    /// Signal the worker to stop; it exits at its next poll point.
    pub fn disarm(&self) {
        self.slot.disarm();
    }

    /// Disarm and wait up to `timeout` for the worker to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        self.slot.join(timeout).await;
    }

    /// Re-read configuration after a reload.
    ///
    /// Disabling clears `next_fire_at` and joins the worker. A pending
    /// schedule survives unrelated edits; it is recomputed from now only
    /// when it is unset, already past, or the interval changed. Arms if the
    /// server runs.
    pub async fn resync(&self, join_timeout: Duration) {
        let config = self.shared.config.snapshot();
        let period = interval(&config);
        let interval_changed = self.shared.swap_interval(period) != period;
        if !config.auto_backup.enabled {
            *self.shared.lock_next() = None;
            self.slot.join(join_timeout).await;
            info!("auto-backup disabled by configuration");
            return;
        }

        let now = self.shared.clock.now();
        {
            let mut next = self.shared.lock_next();
            if interval_changed || is_stale(*next, now) {
                let at = after(now, period);
                *next = Some(at);
                info!(next_fire_at = %at, "backup schedule resynced");
            } else {
                debug!(next_fire_at = ?*next, "backup schedule unchanged by reload");
            }
        }
        if !self.slot.is_alive() {
            self.arm();
        }
    }

    /// Take one backup now, regardless of schedule or pause gate.
    ///
    /// On success the next scheduled backup moves to `now + interval`; on
    /// failure the schedule is left untouched.
    pub async fn force_backup(&self) -> bool {
        info!("forced backup requested");
        if !self.shared.producer.produce_backup().await {
            error!("forced backup failed");
            return false;
        }

        let config = self.shared.config.snapshot();
        if config.auto_backup.enabled {
            let next = after(self.shared.clock.now(), interval(&config));
            *self.shared.lock_next() = Some(next);
            info!(next_fire_at = %next, "forced backup completed; schedule reset");
        } else {
            info!("forced backup completed");
        }
        true
    }

    /// Close the pause gate; the worker holds before its next check.
    pub fn pause(&self) {
        self.shared.gate.send_replace(false);
        info!("scheduled backups paused");
    }

    /// Reopen the pause gate.
    pub fn resume(&self) {
        self.shared.gate.send_replace(true);
        info!("scheduled backups resumed");
    }

    /// Whether the pause gate is closed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        !*self.shared.gate.borrow()
    }

    /// Whether the worker task is still running.
    #[must_use]
    pub fn is_worker_alive(&self) -> bool {
        self.slot.is_alive()
    }

    /// When the next scheduled backup is due.
    #[must_use]
    pub fn next_fire_at(&self) -> Option<DateTime<Local>> {
        *self.shared.lock_next()
    }

    /// Current scheduler state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        SchedulerState {
            next_fire_at: self.next_fire_at(),
            running: self.is_worker_alive(),
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut gate = self.gate.subscribe();
        loop {
            let open = tokio::select! {
                () = cancel.cancelled() => break,
                open = async { gate.wait_for(|open| *open).await.is_ok() } => open,
            };
            if !open {
                break;
            }

            if !self.server_running() {
                info!("server no longer running; backup scheduler disarming");
                break;
            }

            let now = self.clock.now();
            let due = self.lock_next().is_some_and(|at| now >= at);
            if due {
                self.fire(now).await;
            }

            let tick = self.config.snapshot().timings().scheduler_tick;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(tick) => {}
            }
        }
        debug!("backup worker exited");
    }

    async fn fire(&self, now: DateTime<Local>) {
        let config = self.config.snapshot();
        self.prune_if_due(&config, now).await;

        info!("scheduled backup starting");
        let succeeded = self.producer.produce_backup().await;
        let finished = self.clock.now();
        let next = if succeeded {
            after(finished, interval(&config))
        } else {
            after(finished, config.timings().retry)
        };

        let mut slot = self.lock_next();
        // A resync that disabled the feature while the backup ran wins.
        if slot.is_some() {
            *slot = Some(next);
        }
        drop(slot);

        if succeeded {
            info!(next_fire_at = %next, "scheduled backup completed");
        } else {
            warn!(next_fire_at = %next, "scheduled backup failed; retrying");
        }
    }

    async fn prune_if_due(&self, config: &GlobalConfig, now: DateTime<Local>) {
        {
            let mut last = self.last_prune.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| now < after(at, PRUNE_EVERY)) {
                return;
            }
            *last = Some(now);
        }

        let dir: PathBuf = config.backup_dir.clone();
        let prefix = config.auto_backup.prefix.clone();
        let keep_days = config.auto_backup.keep_days;
        let stamp = now.naive_local();
        match tokio::task::spawn_blocking(move || retention::prune(&dir, &prefix, keep_days, stamp))
            .await
        {
            Ok(Ok(report)) => debug!(deleted = report.deleted.len(), "pruning finished"),
            Ok(Err(err)) => error!(%err, "backup pruning failed"),
            Err(err) => error!(%err, "backup pruning task failed"),
        }
    }

    fn server_running(&self) -> bool {
        self.lifecycle
            .upgrade()
            .is_some_and(|lifecycle| lifecycle.is_running())
    }

    fn swap_interval(&self, interval: Duration) -> Duration {
        let mut applied = self
            .applied_interval
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *applied, interval)
    }

    fn lock_next(&self) -> MutexGuard<'_, Option<DateTime<Local>>> {
        self.next_fire_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn interval(config: &GlobalConfig) -> Duration {
    Duration::from_secs(config.auto_backup.interval_minutes.saturating_mul(60))
}
