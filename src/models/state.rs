//! Server lifecycle state and the cached liveness record.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::schedule::SchedulerState;

/// Lifecycle state of the managed server process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// No server process is running.
    Stopped,
    /// A launch is in progress (transient).
    Starting,
    /// The server process is alive.
    Running,
    /// A stop is in progress (transient).
    Stopping,
}

impl ServerState {
    /// Whether this is one of the transient in-progress states.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// Authoritative liveness record maintained by the process probe.
///
/// A fresh process-table query is only issued once `check_interval` has
/// elapsed since `last_checked_at`; until then `process_id` is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcessState {
    /// Identifier of the first matching process, if any.
    pub process_id: Option<u32>,
    /// When the process table was last queried successfully.
    pub last_checked_at: Option<DateTime<Local>>,
    /// Cache window for liveness queries.
    pub check_interval: Duration,
}

impl ManagedProcessState {
    /// Empty record with the given cache window.
    #[must_use]
    pub fn new(check_interval: Duration) -> Self {
        Self {
            process_id: None,
            last_checked_at: None,
            check_interval,
        }
    }

    /// Whether the cached answer may still be used at `now`.
    ///
    /// A clock that moved backwards invalidates the cache.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Local>) -> bool {
        self.last_checked_at.is_some_and(|checked| {
            (now - checked)
                .to_std()
                .is_ok_and(|elapsed| elapsed < self.check_interval)
        })
    }

    /// Store the result of a query performed at `now`.
    pub fn record(&mut self, process_id: Option<u32>, now: DateTime<Local>) {
        self.process_id = process_id;
        self.last_checked_at = Some(now);
    }

    /// Forget the tracked process and force the next check to query.
    pub fn clear(&mut self) {
        self.process_id = None;
        self.last_checked_at = None;
    }
}

/// Point-in-time view of the manager for operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    /// Current lifecycle state.
    pub state: ServerState,
    /// Identifier of the running server process.
    pub process_id: Option<u32>,
    /// Last detected server version, `Unknown` until found.
    pub version: String,
    /// Backup schedule; `next_fire_at` is `None` when auto-backup is off.
    pub backups: SchedulerState,
    /// Restart schedule; `next_fire_at` is `None` when auto-restart is off.
    pub restarts: SchedulerState,
    /// Whether scheduled backups are held at the pause gate.
    pub backups_paused: bool,
    /// Creation time of the newest archive in the backup directory.
    pub latest_backup: Option<NaiveDateTime>,
}
