#![forbid(unsafe_code)]

//! `server-warden`: dedicated game-server supervisor daemon.
//!
//! Loads configuration, builds the lifecycle controller, watches the
//! configuration file for changes, and serves `server-warden-ctl` over
//! local IPC until ctrl-c / SIGTERM, then runs the shutdown sequence.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use server_warden::config::ConfigHandle;
use server_warden::config_watcher::ConfigWatcher;
use server_warden::ipc::server::{spawn_ipc_server, IpcState};
use server_warden::orchestrator::controller::{Collaborators, LifecycleController};
use server_warden::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "server-warden", about = "Dedicated game-server supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Start the server immediately if it is not already running.
    #[arg(long)]
    start: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("server-warden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    let ipc_name = config.ipc_name.clone();
    let auth_token = config.ipc_auth_token.clone();
    let handle = ConfigHandle::new(config.clone());
    info!(path = %args.config.display(), "configuration loaded");

    // ── Build the controller ────────────────────────────
    let controller = LifecycleController::new(handle.clone(), Collaborators::system(&handle));
    if controller.adopt_running() {
        info!("server was already running");
    } else if args.start && !controller.start().await {
        error!("initial server start failed");
    }

    // ── Config hot reload ───────────────────────────────
    let ct = CancellationToken::new();
    let watcher = match ConfigWatcher::new(&args.config, config) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(%err, "config hot reload disabled");
            None
        }
    };
    let reload_handle = watcher.as_ref().map(|watcher| {
        let mut updates = watcher.subscribe();
        let controller = Arc::clone(&controller);
        let ct = ct.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = GlobalConfig::clone(&updates.borrow_and_update());
                        controller.apply_config(next).await;
                    }
                }
            }
        })
    });

    // ── IPC server ──────────────────────────────────────
    let ipc_state = Arc::new(IpcState {
        controller: Arc::clone(&controller),
        auth_token,
    });
    let ipc_handle = spawn_ipc_server(&ipc_name, ipc_state, ct.clone())?;
    info!("server-warden ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    controller.shutdown().await;

    let _ = ipc_handle.await;
    if let Some(handle) = reload_handle {
        let _ = handle.await;
    }
    drop(watcher);
    info!("server-warden shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
