//! Periodic restarts with a warning window.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::scheduler::WorkerSlot;
use super::ServerLifecycle;
use crate::clock::Clock;
use crate::config::{ConfigHandle, GlobalConfig};
use crate::models::schedule::{after, before, is_stale, SchedulerState};

/// Restart scheduler owned by the lifecycle controller.
///
/// Once `now` reaches `next_fire_at - warning`, the worker waits out the
/// warning window and then calls [`ServerLifecycle::restart`]. Disarming
/// during the wait cancels the restart.
pub struct RestartScheduler {
    shared: Arc<Shared>,
    slot: WorkerSlot,
}

struct Shared {
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    lifecycle: Weak<dyn ServerLifecycle>,
    next_fire_at: Mutex<Option<DateTime<Local>>>,
    /// Interval the current schedule was computed with.
    applied_interval: Mutex<Duration>,
}

impl RestartScheduler {
    /// Create a disarmed scheduler.
    #[must_use]
    pub fn new(
        config: ConfigHandle,
        clock: Arc<dyn Clock>,
        lifecycle: Weak<dyn ServerLifecycle>,
    ) -> Self {
        let snapshot = config.snapshot();
        let next = snapshot
            .auto_restart
            .enabled
            .then(|| after(clock.now(), interval(&snapshot)));
        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                lifecycle,
                next_fire_at: Mutex::new(next),
                applied_interval: Mutex::new(interval(&snapshot)),
            }),
            slot: WorkerSlot::new("restart"),
        }
    }

    /// Start the worker; `false` when auto-restart is disabled or the
    /// server is not running.
    pub fn arm(&self) -> bool {
        let config = self.shared.config.snapshot();
        if !config.auto_restart.enabled {
            debug!("auto-restart disabled; not arming");
            return false;
        }
        if !self.shared.server_running() {
            info!("server not running; restart scheduler stays disarmed");
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
            info!(next_fire_at = ?self.next_fire_at(), "restart scheduler armed");
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
    /// Keeps a pending restart unless it is unset, already past, or the
    /// interval changed.
    pub async fn resync(&self, join_timeout: Duration) {
        let config = self.shared.config.snapshot();
        let period = interval(&config);
        let interval_changed = self.shared.swap_interval(period) != period;
        if !config.auto_restart.enabled {
            *self.shared.lock_next() = None;
            self.slot.join(join_timeout).await;
            info!("auto-restart disabled by configuration");
            return;
        }

        let now = self.shared.clock.now();
        {
            let mut next = self.shared.lock_next();
            if interval_changed || is_stale(*next, now) {
                let at = after(now, period);
                *next = Some(at);
                info!(next_fire_at = %at, "restart schedule resynced");
            } else {
                debug!(next_fire_at = ?*next, "restart schedule unchanged by reload");
            }
        }
        if !self.slot.is_alive() {
            self.arm();
        }
    }

    /// Restart the server now, skipping the warning window.
    ///
    /// On success the next scheduled restart moves to `now + interval`
    /// (when auto-restart is enabled); on failure the schedule is left
    /// untouched.
    pub async fn force_restart(&self) -> bool {
        let Some(lifecycle) = self.shared.lifecycle.upgrade() else {
            warn!("forced restart requested but lifecycle is gone");
            return false;
        };

        info!("forced restart requested");
        if !lifecycle.restart().await {
            error!("forced restart failed");
            return false;
        }

        let config = self.shared.config.snapshot();
        if config.auto_restart.enabled {
            let next = after(self.shared.clock.now(), interval(&config));
            *self.shared.lock_next() = Some(next);
            info!(next_fire_at = %next, "forced restart completed; schedule reset");
        } else {
            info!("forced restart completed");
        }
        true
    }

    /// Whether the worker task is still running.
    #[must_use]
    pub fn is_worker_alive(&self) -> bool {
        self.slot.is_alive()
    }

    /// When the next scheduled restart is due.
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
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !self.server_running() {
                info!("server no longer running; restart scheduler disarming");
                break;
            }

            let config = self.config.snapshot();
            let now = self.clock.now();
            let window = warning(&config);
            let in_window = self
                .lock_next()
                .is_some_and(|at| now >= before(at, window));

            if in_window {
                warn!(
                    warning_minutes = config.auto_restart.warning_minutes,
                    "server restart in warning window"
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("scheduled restart cancelled during warning window");
                        break;
                    }
                    () = tokio::time::sleep(window) => {}
                }
                self.fire(&config).await;
                // A restart stops the server, which disarms this worker;
                // the restarted server arms a fresh one.
                continue;
            }

            let tick = config.timings().scheduler_tick;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(tick) => {}
            }
        }
        debug!("restart worker exited");
    }

    async fn fire(&self, config: &GlobalConfig) {
        let Some(lifecycle) = self.lifecycle.upgrade() else {
            return;
        };

        info!("scheduled restart starting");
        let succeeded = lifecycle.restart().await;
        let finished = self.clock.now();
        let next = if succeeded {
            after(finished, interval(config))
        } else {
            after(finished, config.timings().retry)
        };

        let mut slot = self.lock_next();
        if slot.is_some() {
            *slot = Some(next);
        }
        drop(slot);

        if succeeded {
            info!(next_fire_at = %next, "scheduled restart completed");
        } else {
            error!(next_fire_at = %next, "scheduled restart failed; retrying");
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
    Duration::from_secs(config.auto_restart.interval_hours.saturating_mul(3600))
}

fn warning(config: &GlobalConfig) -> Duration {
    Duration::from_secs(config.auto_restart.warning_minutes.saturating_mul(60))
}
