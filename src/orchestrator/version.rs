//! Server version detection from the server's own log file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::schedule::after;

/// Reported until a version line has been seen.
pub const UNKNOWN_VERSION: &str = "Unknown";

#[derive(Default)]
struct Detected {
    version: Option<String>,
    last_checked_at: Option<DateTime<Local>>,
}

/// Caches the last version found in the server log, re-reading the log at
/// most once per throttle interval.
pub struct VersionTracker {
    clock: Arc<dyn Clock>,
    detected: Mutex<Detected>,
}

impl VersionTracker {
    /// Tracker with no version detected yet.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            detected: Mutex::new(Detected::default()),
        }
    }

    /// Last detected version, or [`UNKNOWN_VERSION`].
    #[must_use]
    pub fn current(&self) -> String {
        self.lock()
            .version
            .clone()
            .unwrap_or_else(|| UNKNOWN_VERSION.to_owned())
    }

    /// Re-read the log if `throttle` has elapsed since the last read.
    pub fn refresh(&self, log_path: &Path, marker: &str, throttle: Duration) -> String {
        let now = self.clock.now();
        let recent = self
            .lock()
            .last_checked_at
            .is_some_and(|at| now < after(at, throttle));
        if recent {
            return self.current();
        }
        self.scan(log_path, marker, now)
    }

    /// Re-read the log immediately (after a start or update).
    pub fn refresh_now(&self, log_path: &Path, marker: &str) -> String {
        let now = self.clock.now();
        self.scan(log_path, marker, now)
    }

    fn scan(&self, log_path: &Path, marker: &str, now: DateTime<Local>) -> String {
        let file = match File::open(log_path) {
            Ok(file) => file,
            Err(err) => {
                // Absent until the server's first run; retried on the next refresh.
                debug!(%err, path = %log_path.display(), "server log not readable yet");
                return self.current();
            }
        };

        let found = find_version(BufReader::new(file), marker);
        let mut detected = self.lock();
        detected.last_checked_at = Some(now);
        if let Some(version) = found {
            if detected.version.as_deref() != Some(version.as_str()) {
                info!(%version, "server version detected");
                detected.version = Some(version);
            }
        }
        detected
            .version
            .clone()
            .unwrap_or_else(|| UNKNOWN_VERSION.to_owned())
    }

    fn lock(&self) -> MutexGuard<'_, Detected> {
        self.detected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Version token following `marker` on the first line that carries it.
#[must_use]
pub fn find_version(reader: impl BufRead, marker: &str) -> Option<String> {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "stopped reading server log");
                return None;
            }
        };
        if let Some((_, rest)) = line.split_once(marker) {
            let version = rest.trim();
            return (!version.is_empty()).then(|| version.to_owned());
        }
    }
    None
}
