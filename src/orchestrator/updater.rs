//! Server binary updates through an existing `SteamCMD` installation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span, Instrument};

use crate::config::ConfigHandle;
use crate::process::ProcessFamily;
use crate::{AppError, BoxFuture, Result};

/// Installs or validates the server binaries.
pub trait Updater: Send + Sync {
    /// Run one update to completion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Update` if the tool is missing or fails.
    fn update(&self) -> BoxFuture<'_, Result<()>>;
}

/// [`Updater`] that runs `steamcmd +app_update <app_id> validate`.
pub struct SteamCmdUpdater {
    config: ConfigHandle,
    family: ProcessFamily,
}

impl SteamCmdUpdater {
    /// Create an updater for the host platform.
    #[must_use]
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            family: ProcessFamily::current(),
        }
    }

    /// Path of the `SteamCMD` entry point inside `steamcmd_dir`.
    #[must_use]
    pub fn executable_path(steamcmd_dir: &Path, family: ProcessFamily) -> PathBuf {
        match family {
            ProcessFamily::Windows => steamcmd_dir.join("steamcmd.exe"),
            ProcessFamily::Posix => steamcmd_dir.join("steamcmd.sh"),
        }
    }

    /// Arguments passed to `SteamCMD` for one update.
    #[must_use]
    pub fn update_args(server_dir: &Path, app_id: &str) -> Vec<String> {
        vec![
            "+force_install_dir".into(),
            server_dir.display().to_string(),
            "+login".into(),
            "anonymous".into(),
            "+app_update".into(),
            app_id.into(),
            "validate".into(),
            "+quit".into(),
        ]
    }

    async fn run(&self) -> Result<()> {
        let config = self.config.snapshot();
        let steamcmd = Self::executable_path(&config.steamcmd_dir, self.family);
        if !steamcmd.is_file() {
            return Err(AppError::Update(format!(
                "steamcmd not found at {}",
                steamcmd.display()
            )));
        }

        info!(app_id = %config.app_id, "running steamcmd update");
        let output = Command::new(&steamcmd)
            .args(Self::update_args(&config.server_dir, &config.app_id))
            .current_dir(&config.steamcmd_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Update(format!("failed to run steamcmd: {err}")))?;

        if output.status.success() {
            info!("steamcmd update completed");
            Ok(())
        } else {
            Err(AppError::Update(format!(
                "steamcmd exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Updater for SteamCmdUpdater {
    fn update(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run().instrument(info_span!("steamcmd_update")))
    }
}
