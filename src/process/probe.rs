//! Cached liveness probe for the managed server process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use super::ProcessTable;
use crate::clock::Clock;
use crate::models::state::ManagedProcessState;

/// Answers "is the server running" from the process table, caching each
/// answer for the configured check interval.
///
/// A failed query never escapes: it is logged and reported as not running,
/// so uncertainty can never wedge a stop or shutdown sequence.
pub struct ProcessProbe {
    table: Arc<dyn ProcessTable>,
    executable: String,
    clock: Arc<dyn Clock>,
    state: Mutex<ManagedProcessState>,
}

impl ProcessProbe {
    /// Create a probe for `executable` with an empty cache.
    #[must_use]
    pub fn new(
        table: Arc<dyn ProcessTable>,
        executable: impl Into<String>,
        clock: Arc<dyn Clock>,
        check_interval: Duration,
    ) -> Self {
        Self {
            table,
            executable: executable.into(),
            clock,
            state: Mutex::new(ManagedProcessState::new(check_interval)),
        }
    }

    /// Whether the server is running, served from cache when fresh.
    pub fn is_running(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.is_fresh(now) {
            return state.process_id.is_some();
        }
        self.query(&mut state, now)
    }

    /// Query the process table regardless of cache freshness.
    pub fn refresh(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        self.query(&mut state, now)
    }

    /// Cached process identifier.
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        self.lock().process_id
    }

    /// Record a confirmed process identifier (after a successful launch).
    pub fn record(&self, process_id: u32) {
        let now = self.clock.now();
        self.lock().record(Some(process_id), now);
    }

    /// Forget the tracked process after a confirmed stop.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Executable name the probe matches.
    #[must_use]
    pub fn executable(&self) -> &str {
        &self.executable
    }

    fn lock(&self) -> MutexGuard<'_, ManagedProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query(&self, state: &mut ManagedProcessState, now: DateTime<Local>) -> bool {
        match self.table.find(&self.executable) {
            Ok(process_id) => {
                debug!(executable = %self.executable, ?process_id, "process table queried");
                state.record(process_id, now);
                process_id.is_some()
            }
            Err(err) => {
                warn!(
                    %err,
                    executable = %self.executable,
                    "process query failed; treating server as not running"
                );
                // Leave the cache stale so the next call retries.
                state.clear();
                false
            }
        }
    }
}
