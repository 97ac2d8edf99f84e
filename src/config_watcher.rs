//! Hot reload of `config.toml`.
//!
//! [`ConfigWatcher`] uses the `notify` crate to watch the configuration
//! file. On every change the whole file is re-parsed and validated; a valid
//! result that differs from the last published configuration is sent on a
//! `tokio::sync::watch` channel. Invalid files are logged and ignored, so a
//! half-saved edit never reaches the schedulers.
//!
//! The notify callback runs on a plain OS thread; `watch::Sender` needs no
//! async context to publish.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Returns `true` for file-system events that indicate the watched file was
/// written or replaced.
fn is_config_change(event: &Event, config_path: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == config_path.file_name())
}

/// Re-parse `path` and publish it if it changed.
fn reload(path: &Path, tx: &watch::Sender<Arc<GlobalConfig>>) {
    match GlobalConfig::load_from_path(path) {
        Ok(config) => {
            let changed = tx.send_if_modified(|current| {
                if **current == config {
                    return false;
                }
                *current = Arc::new(config);
                true
            });
            if changed {
                info!(path = %path.display(), "configuration reloaded");
            } else {
                debug!(path = %path.display(), "configuration unchanged");
            }
        }
        Err(err) => warn!(
            %err,
            path = %path.display(),
            "failed to reload configuration; keeping previous values"
        ),
    }
}

/// Watches the configuration file for changes.
///
/// Dropping a `ConfigWatcher` stops the underlying OS watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    updates: watch::Receiver<Arc<GlobalConfig>>,
}

impl ConfigWatcher {
    /// Start watching `config_path`, seeded with the already-loaded
    /// `initial` configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the `notify` watcher cannot be created
    /// or the path cannot be watched.
    pub fn new(config_path: &Path, initial: GlobalConfig) -> Result<Self> {
        let (tx, updates) = watch::channel(Arc::new(initial));
        let path_for_callback: PathBuf = config_path.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_config_change(&event, &path_for_callback) => {
                    reload(&path_for_callback, &tx);
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "config file watcher error"),
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create config file watcher: {err}")))?;

        // Watch the parent directory so rename-based saves are seen.
        let watch_target = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(config_path);

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Config(format!(
                    "failed to watch config path '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %config_path.display(), "config watcher started");

        Ok(Self {
            _watcher: watcher,
            updates,
        })
    }

    /// Receiver notified with each newly applied configuration.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<GlobalConfig>> {
        self.updates.clone()
    }
}
