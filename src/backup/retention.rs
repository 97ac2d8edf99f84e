//! Retention pruning for backup archives.
//!
//! An archive's age is read from the timestamp in its file name; there is
//! no other record. Names that match the prefix but fail to parse are
//! reported and left alone.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta};
use glob::Pattern;
use tracing::{info, warn};

use crate::models::backup::{ArtifactPattern, BackupArtifact};
use crate::{AppError, Result};

/// Outcome of one pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Archives deleted for being older than the retention window.
    pub deleted: Vec<PathBuf>,
    /// Files matching the prefix whose timestamp could not be parsed.
    pub skipped: Vec<PathBuf>,
    /// Expired archives whose removal failed.
    pub failed: Vec<PathBuf>,
}

/// Archives under `dir` named with `prefix`, oldest first.
///
/// Unparseable names are omitted. A missing directory yields an empty list.
///
/// # Errors
///
/// Returns `AppError::Backup` if the directory cannot be listed.
pub fn list_artifacts(dir: &Path, prefix: &str) -> Result<Vec<BackupArtifact>> {
    let pattern = ArtifactPattern::new(prefix)?;
    let mut artifacts: Vec<BackupArtifact> = candidates(dir, prefix)?
        .iter()
        .filter_map(|path| pattern.parse(path))
        .collect();
    artifacts.sort_by_key(|artifact| artifact.created_at);
    Ok(artifacts)
}

/// Delete archives whose embedded timestamp is older than `keep_days`
/// before `now`.
///
/// # Errors
///
/// Returns `AppError::Backup` if the directory cannot be listed. Individual
/// delete failures are recorded in [`PruneReport::failed`] instead.
pub fn prune(dir: &Path, prefix: &str, keep_days: u32, now: NaiveDateTime) -> Result<PruneReport> {
    let pattern = ArtifactPattern::new(prefix)?;
    let cutoff = now
        .checked_sub_signed(TimeDelta::days(i64::from(keep_days)))
        .unwrap_or(NaiveDateTime::MIN);
    let mut report = PruneReport::default();

    for path in candidates(dir, prefix)? {
        let Some(artifact) = pattern.parse(&path) else {
            warn!(path = %path.display(), "backup name has no valid timestamp, skipping");
            report.skipped.push(path);
            continue;
        };
        if artifact.created_at >= cutoff {
            continue;
        }
        match fs::remove_file(&artifact.path) {
            Ok(()) => {
                info!(path = %artifact.path.display(), "deleted expired backup");
                report.deleted.push(artifact.path);
            }
            Err(err) => {
                warn!(%err, path = %artifact.path.display(), "failed to delete expired backup");
                report.failed.push(artifact.path);
            }
        }
    }

    info!(
        keep_days,
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "retention pass completed"
    );
    Ok(report)
}

/// Regular files in `dir` whose names look like `<prefix>_*.zip`.
fn candidates(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let query = format!(
        "{}/{}_*.zip",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(prefix)
    );
    let paths = glob::glob(&query)
        .map_err(|err| AppError::Backup(format!("invalid backup glob {query}: {err}")))?;

    let mut found = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => found.push(path),
            Ok(_) => {}
            Err(err) => warn!(%err, "unreadable entry in backup directory"),
        }
    }
    Ok(found)
}
