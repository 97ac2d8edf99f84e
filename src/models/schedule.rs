//! Scheduler state shared between a scheduler and its worker task.

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;

/// Per-scheduler timing record.
///
/// `next_fire_at` is `None` exactly when the scheduler's feature is
/// disabled in configuration. The stop signal lives with the worker
/// (`CancellationToken`), not here.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SchedulerState {
    /// When the scheduled operation should next run.
    pub next_fire_at: Option<DateTime<Local>>,
    /// Whether a worker loop is active.
    pub running: bool,
}

/// Whether a schedule must be recomputed before arming: never set, or
/// already in the past.
#[must_use]
pub fn is_stale(next_fire_at: Option<DateTime<Local>>, now: DateTime<Local>) -> bool {
    !matches!(next_fire_at, Some(at) if at > now)
}

/// `at + delay`, saturating to `at` on out-of-range arithmetic.
#[must_use]
pub fn after(at: DateTime<Local>, delay: Duration) -> DateTime<Local> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

/// `at - delay`, saturating to `at` on out-of-range arithmetic.
#[must_use]
pub fn before(at: DateTime<Local>, delay: Duration) -> DateTime<Local> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(at)
}
