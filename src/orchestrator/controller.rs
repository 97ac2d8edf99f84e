//! Lifecycle controller: the single source of truth for "is the server
//! running".
//!
//! Every operation returns `bool` and logs its own failures; nothing here
//! propagates an error to the caller. Lifecycle operations are serialised
//! by an internal lock, so the IPC surface and the restart scheduler can
//! both drive the controller safely.
//!
//! Stopping is two-phase: a graceful terminate with a bounded wait, then
//! a forced kill by name, then a bounded poll until the process table no
//! longer shows the server. A single terminate is never trusted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::backup_scheduler::BackupScheduler;
use super::launcher::{Launcher, Spawner, TerminalSpawner};
use super::restart_scheduler::RestartScheduler;
use super::updater::{SteamCmdUpdater, Updater};
use super::version::VersionTracker;
use super::ServerLifecycle;
use crate::backup::archiver::ZipArchiver;
use crate::backup::retention;
use crate::backup::BackupProducer;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigHandle, GlobalConfig};
use crate::models::state::{ServerState, StatusReport};
use crate::process::handle::ProcessHandle;
use crate::process::probe::ProcessProbe;
use crate::process::{platform_table, ProcessFamily, ProcessTable};
use crate::BoxFuture;

/// External capabilities the controller drives.
pub struct Collaborators {
    /// Platform process table.
    pub table: Arc<dyn ProcessTable>,
    /// Server process spawner.
    pub spawner: Arc<dyn Spawner>,
    /// Backup producer shared with the backup scheduler.
    pub backup: Arc<dyn BackupProducer>,
    /// Server binary updater.
    pub updater: Arc<dyn Updater>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Real implementations for the host platform.
    #[must_use]
    pub fn system(config: &ConfigHandle) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            table: platform_table(ProcessFamily::current()),
            spawner: Arc::new(TerminalSpawner::new()),
            backup: Arc::new(ZipArchiver::new(config.clone(), Arc::clone(&clock))),
            updater: Arc::new(SteamCmdUpdater::new(config.clone())),
            clock,
        }
    }
}

/// Start / stop / restart / update / shutdown state machine.
pub struct LifecycleController {
    config: ConfigHandle,
    probe: Arc<ProcessProbe>,
    launcher: Launcher,
    table: Arc<dyn ProcessTable>,
    updater: Arc<dyn Updater>,
    backup: Arc<dyn BackupProducer>,
    backups: BackupScheduler,
    restarts: RestartScheduler,
    version: VersionTracker,
    state: Mutex<ServerState>,
    handle: AsyncMutex<Option<Box<dyn ProcessHandle>>>,
    op_lock: AsyncMutex<()>,
    shutting_down: AtomicBool,
    shutdown_event: CancellationToken,
}

impl LifecycleController {
    /// Build the controller and its two schedulers (both disarmed).
    ///
    /// The initial state is re-derived from the process table, so a server
    /// left running by a previous manager is reported as `Running`.
    #[must_use]
    pub fn new(config: ConfigHandle, parts: Collaborators) -> Arc<Self> {
        let snapshot = config.snapshot();
        let timings = snapshot.timings();
        let probe = Arc::new(ProcessProbe::new(
            Arc::clone(&parts.table),
            snapshot.server.executable_name(ProcessFamily::current()),
            Arc::clone(&parts.clock),
            timings.probe_interval,
        ));
        let initial = if probe.refresh() {
            ServerState::Running
        } else {
            ServerState::Stopped
        };

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let lifecycle: Weak<dyn ServerLifecycle> = weak.clone();
            Self {
                launcher: Launcher::new(config.clone(), Arc::clone(&probe), parts.spawner),
                backups: BackupScheduler::new(
                    config.clone(),
                    Arc::clone(&parts.backup),
                    Arc::clone(&parts.clock),
                    lifecycle.clone(),
                ),
                restarts: RestartScheduler::new(config.clone(), Arc::clone(&parts.clock), lifecycle),
                version: VersionTracker::new(Arc::clone(&parts.clock)),
                config,
                probe,
                table: parts.table,
                updater: parts.updater,
                backup: parts.backup,
                state: Mutex::new(initial),
                handle: AsyncMutex::new(None),
                op_lock: AsyncMutex::new(()),
                shutting_down: AtomicBool::new(false),
                shutdown_event: CancellationToken::new(),
            }
        })
    }

    /// Whether the server is running (cached probe).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.probe.is_running()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.lock_state()
    }

    /// Backup scheduler (pause/resume, forced backups).
    #[must_use]
    pub fn backups(&self) -> &BackupScheduler {
        &self.backups
    }

    /// Restart scheduler.
    #[must_use]
    pub fn restarts(&self) -> &RestartScheduler {
        &self.restarts
    }

    /// Token cancelled once [`shutdown`](Self::shutdown) has completed.
    #[must_use]
    pub fn shutdown_event(&self) -> CancellationToken {
        self.shutdown_event.clone()
    }

    /// Arm both schedulers for a server that was already running when the
    /// manager started.
    pub fn adopt_running(&self) -> bool {
        if !self.probe.refresh() {
            return false;
        }
        info!(pid = ?self.probe.process_id(), "adopting running server");
        self.set_state(ServerState::Running);
        self.arm_schedulers();
        self.refresh_version_now();
        true
    }

    /// Launch the server if it is not running.
    pub async fn start(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.start_locked().instrument(info_span!("start")).await
    }

    /// Stop the server, escalating to a forced kill if needed.
    ///
    /// Returns `false` without side effects if the server is not running.
    pub async fn stop(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.stop_locked().instrument(info_span!("stop")).await
    }

    /// Stop, wait the restart delay, then start.
    ///
    /// The start is attempted even if the stop failed; the result is that
    /// of the start alone.
    pub async fn restart(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.restart_locked().instrument(info_span!("restart")).await
    }

    /// Stop the server if running, then run the updater.
    pub async fn update(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.update_locked().instrument(info_span!("update")).await
    }

    /// Terminal sequence run once at manager teardown.
    ///
    /// Disarms and joins the schedulers, stops the server if running, takes
    /// the shutdown backup when configured, then fires the shutdown event.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return;
        }
        self.shutdown_inner().instrument(info_span!("shutdown")).await;
    }

    /// Replace the configuration and resync both schedulers.
    pub async fn apply_config(&self, config: GlobalConfig) {
        let join_timeout = config.timings().join_timeout;
        self.config.replace(config);
        self.backups.resync(join_timeout).await;
        self.restarts.resync(join_timeout).await;
        info!("configuration applied");
    }

    /// Operator status snapshot.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let config = self.config.snapshot();
        let running = self.probe.is_running();
        let mut state = self.state();
        if !state.is_transient() {
            // Reconcile with reality; the server may have exited on its own.
            state = if running {
                ServerState::Running
            } else {
                ServerState::Stopped
            };
        }

        StatusReport {
            state,
            process_id: self.probe.process_id(),
            version: self.version.refresh(
                &config.server_log_path(),
                &config.server.version_marker,
                config.timings().version_check,
            ),
            backups: self.backups.state(),
            restarts: self.restarts.state(),
            backups_paused: self.backups.is_paused(),
            latest_backup: latest_backup(&config),
        }
    }

    async fn start_locked(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!("manager is shutting down; start refused");
            return false;
        }
        if self.probe.is_running() {
            info!("server is already running");
            return false;
        }

        self.set_state(ServerState::Starting);
        let settle = self.config.snapshot().timings().settle;
        match self.launcher.launch(settle).await {
            Ok(launched) => {
                *self.handle.lock().await = Some(launched.handle);
                self.probe.record(launched.process_id);
                self.set_state(ServerState::Running);
                self.arm_schedulers();
                self.refresh_version_now();
                info!(pid = launched.process_id, "server started");
                true
            }
            Err(err) => {
                self.set_state(ServerState::Stopped);
                error!(%err, "server start failed");
                false
            }
        }
    }

    async fn stop_locked(&self) -> bool {
        if !self.probe.is_running() {
            info!("server is not running");
            return false;
        }

        let config = self.config.snapshot();
        let timings = config.timings();
        self.set_state(ServerState::Stopping);
        self.backups.disarm();
        self.restarts.disarm();

        let mut handle = self.handle.lock().await.take();
        let graceful = match handle.as_mut() {
            Some(handle) => {
                match handle.terminate() {
                    Ok(()) => info!("graceful terminate sent"),
                    Err(err) => warn!(%err, "graceful terminate failed"),
                }
                self.wait_until_stopped(timings.graceful_stop, timings.stop_poll)
                    .await
            }
            None => {
                info!("no tracked process handle; skipping graceful terminate");
                false
            }
        };

        if !graceful {
            warn!(
                executable = %self.probe.executable(),
                "server still running; forcing kill"
            );
            if let Err(err) = self
                .table
                .force_kill(self.probe.executable(), &config.server.window_title)
                .await
            {
                error!(%err, "forced kill failed");
            }
            if let Some(handle) = handle.as_mut() {
                if let Err(err) = handle.kill().await {
                    debug!(%err, "spawned handle already gone");
                }
            }
        }

        let stopped = graceful
            || self
                .wait_until_stopped(timings.shutdown_timeout, timings.stop_poll)
                .await;

        if stopped {
            if let Some(handle) = handle.as_mut() {
                // Reap the spawned process so it does not linger as a zombie.
                if !handle.wait_exit(timings.stop_poll).await {
                    debug!("spawned process not reaped yet");
                }
            }
            self.probe.clear();
            self.set_state(ServerState::Stopped);
            info!("server stopped");
            return true;
        }

        error!(
            timeout = ?timings.shutdown_timeout,
            "server still running after forced kill"
        );
        // Keep the handle for a later attempt and resume scheduling for the
        // server that is still up.
        *self.handle.lock().await = handle;
        self.set_state(ServerState::Running);
        self.arm_schedulers();
        false
    }

    async fn restart_locked(&self) -> bool {
        info!("restarting server");
        let was_running = self.probe.is_running();
        if was_running && !self.stop_locked().await {
            error!("stop failed during restart; attempting start anyway");
        }

        let delay = self.config.snapshot().timings().restart_delay;
        tokio::time::sleep(delay).await;

        let started = self.start_locked().await;
        if !started {
            error!("restart failed: server did not start");
        }
        started
    }

    async fn update_locked(&self) -> bool {
        if self.probe.is_running() && !self.stop_locked().await {
            error!("update aborted: server could not be stopped");
            return false;
        }

        match self.updater.update().await {
            Ok(()) => {
                self.refresh_version_now();
                info!("server update completed");
                true
            }
            Err(err) => {
                error!(%err, "server update failed");
                false
            }
        }
    }

    async fn shutdown_inner(&self) {
        let config = self.config.snapshot();
        let join_timeout = config.timings().join_timeout;

        // A scheduled restart in flight finishes first; its start is
        // refused because the shutting-down flag is already set.
        self.backups.shutdown(join_timeout).await;
        self.restarts.shutdown(join_timeout).await;

        let _op = self.op_lock.lock().await;
        let was_running = self.probe.is_running();
        if was_running && !self.stop_locked().await {
            error!("server could not be stopped during shutdown");
        }

        if was_running && config.auto_backup.backup_on_shutdown {
            info!("taking shutdown backup");
            if !self.backup.produce_backup().await {
                error!("shutdown backup failed");
            }
        }

        self.shutdown_event.cancel();
        info!("manager shutdown complete");
    }

    async fn wait_until_stopped(&self, timeout: Duration, poll: Duration) -> bool {
        // `now + timeout` overflows for very large configured timeouts.
        let started = Instant::now();
        loop {
            if !self.probe.refresh() {
                return true;
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return false;
            }
            tokio::time::sleep(poll.min(timeout - elapsed)).await;
        }
    }

    fn arm_schedulers(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let backups = self.backups.arm();
        let restarts = self.restarts.arm();
        debug!(backups, restarts, "schedulers armed");
    }

    fn refresh_version_now(&self) {
        let config = self.config.snapshot();
        let version = self
            .version
            .refresh_now(&config.server_log_path(), &config.server.version_marker);
        debug!(%version, "version refreshed");
    }

    fn set_state(&self, state: ServerState) {
        *self.lock_state() = state;
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn latest_backup(config: &GlobalConfig) -> Option<NaiveDateTime> {
    match retention::list_artifacts(&config.backup_dir, &config.auto_backup.prefix) {
        Ok(artifacts) => artifacts.last().map(|artifact| artifact.created_at),
        Err(err) => {
            debug!(%err, "backup directory not listable");
            None
        }
    }
}

impl ServerLifecycle for LifecycleController {
    fn is_running(&self) -> bool {
        LifecycleController::is_running(self)
    }

    fn restart(&self) -> BoxFuture<'_, bool> {
        Box::pin(LifecycleController::restart(self))
    }
}
