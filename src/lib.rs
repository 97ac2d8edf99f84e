#![forbid(unsafe_code)]

//! Supervisor for a dedicated game-server process: lifecycle control with
//! graceful-then-forced stops, plus scheduled backups and restarts.

use std::future::Future;
use std::pin::Pin;

pub mod backup;
pub mod clock;
pub mod config;
pub mod config_watcher;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod server_settings;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

/// Boxed, sendable future used at trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
