//! Handle to a spawned server process.

use std::time::Duration;

use tokio::process::Child;
use tracing::warn;

use crate::{AppError, BoxFuture, Result};

/// Control surface over the process the launcher spawned.
pub trait ProcessHandle: Send {
    /// OS identifier of the spawned process, if still known.
    fn id(&self) -> Option<u32>;

    /// Deliver a graceful termination request the process may catch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the request cannot be delivered.
    fn terminate(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the process to exit; `true` if it did.
    fn wait_exit(&mut self, timeout: Duration) -> BoxFuture<'_, bool>;

    /// Kill the spawned process outright.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the kill fails.
    fn kill(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// [`ProcessHandle`] over a `tokio` child process.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
}

impl ChildHandle {
    /// Wrap a spawned child.
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ProcessHandle for ChildHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        let raw = i32::try_from(pid)
            .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM)
            .map_err(|err| AppError::Process(format!("failed to send SIGTERM to {pid}: {err}")))
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        // Console processes have no catchable terminate request on Windows.
        self.child
            .start_kill()
            .map_err(|err| AppError::Process(format!("failed to terminate process: {err}")))
    }

    fn wait_exit(&mut self, timeout: Duration) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_status)) => true,
                Ok(Err(err)) => {
                    warn!(%err, "error waiting for server process");
                    false
                }
                Err(_) => false,
            }
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.child
                .kill()
                .await
                .map_err(|err| AppError::Process(format!("failed to kill process: {err}")))
        })
    }
}
