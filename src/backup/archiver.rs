//! Zip archiver for the server's save-data directory.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::BackupProducer;
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::models::backup::artifact_file_name;
use crate::{AppError, BoxFuture, Result};

/// [`BackupProducer`] that zips `<server_dir>/<save_dir>` into the backup
/// directory.
pub struct ZipArchiver {
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
}

impl ZipArchiver {
    /// Create an archiver reading paths from `config` at each backup.
    #[must_use]
    pub fn new(config: ConfigHandle, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Create one archive and return its path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backup` if the save directory is missing, the
    /// archive already exists, or writing fails.
    pub async fn archive(&self) -> Result<PathBuf> {
        let config = self.config.snapshot();
        let source = config.save_dir();
        let target = config.backup_dir.join(artifact_file_name(
            &config.auto_backup.prefix,
            self.clock.now().naive_local(),
        ));

        tokio::task::spawn_blocking(move || write_archive(&source, &target).map(|()| target))
            .await
            .map_err(|err| AppError::Backup(format!("backup task failed: {err}")))?
    }
}

impl BackupProducer for ZipArchiver {
    fn produce_backup(&self) -> BoxFuture<'_, bool> {
        Box::pin(
            async move {
                match self.archive().await {
                    Ok(path) => {
                        info!(path = %path.display(), "backup created");
                        true
                    }
                    Err(err) => {
                        error!(%err, "backup failed");
                        false
                    }
                }
            }
            .instrument(info_span!("produce_backup")),
        )
    }
}

/// Zip every file below `source` into a new archive at `target`.
fn write_archive(source: &Path, target: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(AppError::Backup(format!(
            "save directory not found: {}",
            source.display()
        )));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|err| {
            AppError::Backup(format!("cannot create {}: {err}", target.display()))
        })?;

    if let Err(err) = zip_directory(file, source) {
        // Never leave a truncated archive where retention would count it.
        let _ = fs::remove_file(target);
        return Err(err);
    }
    Ok(())
}

fn zip_directory(file: File, source: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|err| AppError::Backup(format!("walk failed: {err}")))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| AppError::Backup(err.to_string()))?;
        let name = archive_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Forward-slash entry name, as zip readers expect on every platform.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
