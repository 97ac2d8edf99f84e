//! Backup archive naming.
//!
//! Archives are named `<prefix>_YYYYMMDD_HHMMSS.zip`. The embedded
//! timestamp is the only record of when an archive was created, so the
//! name must always parse back to the creation time.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;

use crate::{AppError, Result};

/// Timestamp layout embedded in archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A backup archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    /// Full path of the archive.
    pub path: PathBuf,
    /// Local creation time recovered from the file name.
    pub created_at: NaiveDateTime,
}

/// Build the archive file name for a backup created at `created_at`.
#[must_use]
pub fn artifact_file_name(prefix: &str, created_at: NaiveDateTime) -> String {
    format!("{prefix}_{}.zip", created_at.format(TIMESTAMP_FORMAT))
}

/// Matcher for archive names produced with a given prefix.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    regex: Regex,
}

impl ArtifactPattern {
    /// Compile the matcher for `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backup` if the pattern cannot be compiled.
    pub fn new(prefix: &str) -> Result<Self> {
        let pattern = format!(r"^{}_(\d{{8}}_\d{{6}})\.zip$", regex::escape(prefix));
        let regex = Regex::new(&pattern)
            .map_err(|err| AppError::Backup(format!("invalid backup prefix pattern: {err}")))?;
        Ok(Self { regex })
    }

    /// Recover the artifact record from `path`, or `None` if the file name
    /// does not carry a valid timestamp.
    #[must_use]
    pub fn parse(&self, path: &Path) -> Option<BackupArtifact> {
        let name = path.file_name()?.to_str()?;
        let captures = self.regex.captures(name)?;
        let stamp = captures.get(1)?.as_str();
        let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(BackupArtifact {
            path: path.to_path_buf(),
            created_at,
        })
    }
}
