//! POSIX-family process table: command-line matching and `SIGKILL`.
//!
//! Matching follows `pgrep -f` semantics: a process matches when the
//! executable name appears anywhere in its command line. Forced kills send
//! signal 9 to every match, then sweep terminal emulators whose command
//! line carries the server window title.

use std::sync::{Mutex, PoisonError};

use sysinfo::{Process, Signal, System};
use tracing::{debug, info, warn};

use super::{first_match, ProcessTable};
use crate::{AppError, BoxFuture, Result};

/// Terminal emulators the launcher may have used to host the server.
pub const TERMINAL_EMULATORS: &[&str] = &[
    "gnome-terminal",
    "konsole",
    "xterm",
    "x-terminal-emulator",
    "xfce4-terminal",
];

/// Process table that greps process command lines.
pub struct PosixProcessTable {
    system: Mutex<System>,
}

impl PosixProcessTable {
    /// Create a table with an empty process snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Refresh the snapshot and collect PIDs of processes accepted by `filter`.
    fn matching(&self, filter: impl Fn(&Process) -> bool) -> Result<Vec<u32>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(AppError::Process(
                "process listing is not supported on this system".into(),
            ));
        }

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes();

        let own_pid = std::process::id();
        Ok(system
            .processes()
            .iter()
            .filter(|(pid, process)| pid.as_u32() != own_pid && filter(process))
            .map(|(pid, _)| pid.as_u32())
            .collect())
    }

    /// Send `SIGKILL` to each PID; returns how many signals were delivered.
    fn kill_all(&self, pids: &[u32]) -> usize {
        let system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        pids.iter()
            .filter(|pid| {
                system
                    .process(sysinfo::Pid::from_u32(**pid))
                    .and_then(|process| process.kill_with(Signal::Kill))
                    .unwrap_or(false)
            })
            .count()
    }
}

impl Default for PosixProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `process` matches `needle` by name or anywhere in its arguments.
fn command_line_matches(process: &Process, needle: &str) -> bool {
    process.name().contains(needle) || process.cmd().join(" ").contains(needle)
}

/// Whether `process` is a terminal emulator hosting a window titled `title`.
fn is_hosting_terminal(process: &Process, title: &str) -> bool {
    let name = process.name();
    TERMINAL_EMULATORS.iter().any(|term| name.contains(term))
        && process.cmd().join(" ").contains(title)
}

impl ProcessTable for PosixProcessTable {
    fn find(&self, executable: &str) -> Result<Option<u32>> {
        let pids = self.matching(|process| command_line_matches(process, executable))?;
        Ok(first_match(pids))
    }

    fn force_kill<'a>(
        &'a self,
        executable: &'a str,
        window_title: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let targets = self.matching(|process| command_line_matches(process, executable))?;
            let killed = self.kill_all(&targets);
            if killed < targets.len() {
                warn!(
                    executable,
                    matched = targets.len(),
                    killed,
                    "some server processes could not be signalled"
                );
            }
            info!(executable, killed, "sent SIGKILL to server processes");

            if window_title.is_empty() {
                return Ok(());
            }
            match self.matching(|process| is_hosting_terminal(process, window_title)) {
                Ok(terminals) if !terminals.is_empty() => {
                    let closed = self.kill_all(&terminals);
                    info!(closed, "closed terminal windows hosting the server");
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "terminal cleanup skipped"),
            }
            Ok(())
        })
    }
}
