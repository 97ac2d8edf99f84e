//! Server launcher.
//!
//! Builds the startup arguments from configuration, writes the server
//! settings file, and spawns the server detached from the manager so the
//! manager exiting never takes the server down with it. A launch only
//! counts once the process table confirms the server after the settle
//! period.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{ConfigHandle, GlobalConfig};
use crate::process::handle::{ChildHandle, ProcessHandle};
use crate::process::posix::TERMINAL_EMULATORS;
use crate::process::probe::ProcessProbe;
use crate::process::ProcessFamily;
use crate::server_settings::write_server_settings;
use crate::{AppError, Result};

/// Server command-line arguments for `config`.
///
/// Extra `startup_params` are split on whitespace and appended last.
#[must_use]
pub fn build_startup_args(config: &GlobalConfig) -> Vec<String> {
    let server = &config.server;
    let mut args = vec![
        "-servername".to_owned(),
        server.name.clone(),
        "-gameport".to_owned(),
        server.game_port.to_string(),
        "-queryport".to_owned(),
        server.query_port.to_string(),
        "-maxplayers".to_owned(),
        server.max_players.to_string(),
        "-maxfps".to_owned(),
        server.max_fps.to_string(),
        "-tickrate".to_owned(),
        server.tick_rate.to_string(),
    ];
    if server.pvp_enabled {
        args.push("-pvp".to_owned());
    }
    args.push("-difficulty".to_owned());
    args.push(server.difficulty.clone());
    args.extend(server.startup_params.split_whitespace().map(str::to_owned));
    args
}

/// Starts the server process in its own console or session.
pub trait Spawner: Send + Sync {
    /// Spawn the server with `args`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be created.
    fn spawn(&self, config: &GlobalConfig, args: &[String]) -> Result<Box<dyn ProcessHandle>>;
}

/// Production [`Spawner`].
///
/// Windows: a new console window. POSIX: the first terminal emulator found
/// on `PATH`, titled with `server.window_title`, or a detached process
/// group when none is installed.
#[derive(Debug, Clone, Copy)]
pub struct TerminalSpawner {
    family: ProcessFamily,
}

impl TerminalSpawner {
    /// Spawner for the host platform.
    #[must_use]
    pub fn new() -> Self {
        Self {
            family: ProcessFamily::current(),
        }
    }

    fn command(self, config: &GlobalConfig, args: &[String]) -> Command {
        let executable = config.server.executable_name(self.family);
        match self.family {
            ProcessFamily::Windows => {
                #[cfg_attr(not(windows), allow(unused_mut))]
                let mut cmd = Command::new(config.server_dir.join(&executable));
                cmd.args(args);
                #[cfg(windows)]
                cmd.creation_flags(CREATE_NEW_CONSOLE);
                cmd
            }
            ProcessFamily::Posix => posix_command(config, &executable, args),
        }
    }
}

impl Default for TerminalSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;

impl Spawner for TerminalSpawner {
    fn spawn(&self, config: &GlobalConfig, args: &[String]) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = self.command(config, args);
        cmd.current_dir(&config.server_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!(
                "failed to spawn server in {}: {err}",
                config.server_dir.display()
            ))
        })?;
        Ok(Box::new(ChildHandle::new(child)))
    }
}

fn posix_command(config: &GlobalConfig, executable: &str, args: &[String]) -> Command {
    let script = shell_script(&config.server_dir, executable, args);
    let title = &config.server.window_title;

    let Some(terminal) = TERMINAL_EMULATORS
        .iter()
        .find(|term| which::which(term).is_ok())
    else {
        info!("no terminal emulator found; launching server headless");
        let mut cmd = Command::new("bash");
        cmd.args(["-c", &script]);
        #[cfg(unix)]
        cmd.process_group(0);
        return cmd;
    };

    let mut cmd = Command::new(terminal);
    match *terminal {
        "gnome-terminal" => cmd.arg(format!("--title={title}")).arg("--"),
        "xfce4-terminal" => cmd.args(["--title", title, "-x"]),
        _ => cmd.args(["-T", title, "-e"]),
    };
    cmd.args(["bash", "-c", &script]);
    cmd
}

/// `cd <dir> && ./<exe> <args...>` with every piece single-quoted.
fn shell_script(server_dir: &Path, executable: &str, args: &[String]) -> String {
    let mut script = format!(
        "cd {} && {}",
        shell_quote(&server_dir.display().to_string()),
        shell_quote(&format!("./{executable}"))
    );
    for arg in args {
        script.push(' ');
        script.push_str(&shell_quote(arg));
    }
    script
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// A server the launcher confirmed running.
pub struct LaunchedServer {
    /// Handle to the spawned process (the hosting terminal on POSIX).
    pub handle: Box<dyn ProcessHandle>,
    /// Server PID reported by the process table.
    pub process_id: u32,
}

/// Spawns the server and confirms it came up.
pub struct Launcher {
    config: ConfigHandle,
    probe: Arc<ProcessProbe>,
    spawner: Arc<dyn Spawner>,
}

impl Launcher {
    /// Create a launcher.
    #[must_use]
    pub fn new(config: ConfigHandle, probe: Arc<ProcessProbe>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            config,
            probe,
            spawner,
        }
    }

    /// Launch the server and wait `settle` before confirming it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the server is already running, cannot
    /// be spawned, or is not visible in the process table after `settle`.
    /// In the last case the spawned process is killed.
    pub async fn launch(&self, settle: Duration) -> Result<LaunchedServer> {
        self.launch_inner(settle)
            .instrument(info_span!("launch"))
            .await
    }

    async fn launch_inner(&self, settle: Duration) -> Result<LaunchedServer> {
        if self.probe.refresh() {
            return Err(AppError::Spawn("server is already running".into()));
        }

        let config = self.config.snapshot();
        if let Err(err) = write_server_settings(&config) {
            warn!(%err, "failed to update server settings file; launching anyway");
        }

        let args = build_startup_args(&config);
        let mut handle = self.spawner.spawn(&config, &args)?;
        info!(
            pid = handle.id().unwrap_or(0),
            server = %config.server.name,
            "server process spawned"
        );

        tokio::time::sleep(settle).await;

        if self.probe.refresh() {
            if let Some(process_id) = self.probe.process_id() {
                info!(pid = process_id, "server confirmed running");
                return Ok(LaunchedServer { handle, process_id });
            }
        }

        if let Err(err) = handle.kill().await {
            warn!(%err, "failed to kill unconfirmed server process");
        }
        Err(AppError::Spawn(format!(
            "server not running {}s after launch",
            settle.as_secs()
        )))
    }
}
