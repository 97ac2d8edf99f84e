//! Server lifecycle orchestration.
//!
//! Covers launching the server, the start/stop/restart/update state
//! machine, version detection, and the backup and restart schedulers.

pub mod backup_scheduler;
pub mod controller;
pub mod launcher;
pub mod restart_scheduler;
pub mod scheduler;
pub mod updater;
pub mod version;

use crate::BoxFuture;

/// The slice of the lifecycle controller the schedulers depend on.
///
/// Schedulers hold this as a `Weak` reference so the controller can own
/// them without a reference cycle.
pub trait ServerLifecycle: Send + Sync {
    /// Whether the managed server is currently running.
    fn is_running(&self) -> bool;

    /// Stop, settle, then start the server; `true` if the final start
    /// succeeded.
    fn restart(&self) -> BoxFuture<'_, bool>;
}
