//! Operating-system process control.
//!
//! The [`ProcessTable`] trait isolates the platform-specific liveness query
//! and forced-kill primitives. Two implementations exist, one per
//! [`ProcessFamily`]; [`platform_table`] picks one once at startup.

pub mod handle;
pub mod posix;
pub mod probe;
pub mod windows;

use std::sync::Arc;

use serde::Serialize;

use crate::{BoxFuture, Result};

/// Operating-system family, deciding process matching and kill mechanics.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessFamily {
    /// Windows: image-name matching, `taskkill` escalation.
    Windows,
    /// Linux, macOS and other Unix-likes: command-line matching, `SIGKILL`.
    Posix,
}

impl ProcessFamily {
    /// Family of the host this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

/// Platform process-table capability.
pub trait ProcessTable: Send + Sync {
    /// Identifier of the first process matching `executable`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the process table cannot be read.
    fn find(&self, executable: &str) -> Result<Option<u32>>;

    /// Unconditionally kill every process matching `executable`, then make
    /// a best-effort pass over any console or terminal windows that were
    /// opened to host it (`window_title`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the kill primitive itself fails.
    fn force_kill<'a>(
        &'a self,
        executable: &'a str,
        window_title: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Construct the process table for `family`.
#[must_use]
pub fn platform_table(family: ProcessFamily) -> Arc<dyn ProcessTable> {
    match family {
        ProcessFamily::Windows => Arc::new(windows::WindowsProcessTable::new()),
        ProcessFamily::Posix => Arc::new(posix::PosixProcessTable::new()),
    }
}

/// Lowest PID among `pids`, so "first match" is stable across queries.
pub(crate) fn first_match(pids: impl IntoIterator<Item = u32>) -> Option<u32> {
    pids.into_iter().min()
}
