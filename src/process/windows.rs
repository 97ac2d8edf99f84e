//! Windows-family process table: image-name matching and `taskkill`.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{first_match, ProcessTable};
use crate::{AppError, BoxFuture, Result};

/// Upper bound on each external kill command.
const KILL_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Process table that lists processes and filters on exact image name.
pub struct WindowsProcessTable {
    system: Mutex<System>,
}

impl WindowsProcessTable {
    /// Create a table with an empty process snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for WindowsProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for WindowsProcessTable {
    fn find(&self, executable: &str) -> Result<Option<u32>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(AppError::Process(
                "process listing is not supported on this system".into(),
            ));
        }

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes();

        let own_pid = std::process::id();
        Ok(first_match(
            system
                .processes()
                .iter()
                .filter(|(_, process)| process.name().eq_ignore_ascii_case(executable))
                .map(|(pid, _)| pid.as_u32())
                .filter(|pid| *pid != own_pid),
        ))
    }

    fn force_kill<'a>(
        &'a self,
        executable: &'a str,
        _window_title: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            run_kill_command(Command::new("taskkill").args(["/F", "/IM", executable])).await?;
            info!(executable, "taskkill issued");

            // Console windows opened with the server carry its image name in
            // their title; close any that outlived the process.
            let stem = Path::new(executable)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(executable);
            let script = format!(
                "$processes = Get-Process | Where-Object {{$_.MainWindowTitle -like '*{stem}*'}}; \
                 if ($processes) {{ $processes | Stop-Process -Force }}"
            );
            if let Err(err) =
                run_kill_command(Command::new("powershell").args(["-command", &script])).await
            {
                debug!(%err, "console window cleanup failed");
            }
            Ok(())
        })
    }
}

/// Run a kill helper, bounded by [`KILL_COMMAND_TIMEOUT`].
async fn run_kill_command(command: &mut Command) -> Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(KILL_COMMAND_TIMEOUT, command.status()).await {
        Ok(Ok(status)) => {
            if !status.success() {
                // taskkill exits non-zero when nothing matched; not an error.
                warn!(?status, "kill command exited unsuccessfully");
            }
            Ok(())
        }
        Ok(Err(err)) => Err(AppError::Process(format!("failed to run kill command: {err}"))),
        Err(_) => Err(AppError::Process(format!(
            "kill command did not finish within {KILL_COMMAND_TIMEOUT:?}"
        ))),
    }
}
