//! Backup production and retention.
//!
//! [`BackupProducer`] is the seam the schedulers fire through;
//! [`archiver::ZipArchiver`] is the production implementation and
//! [`retention`] prunes aged archives by the timestamp in their names.

pub mod archiver;
pub mod retention;

use crate::BoxFuture;

/// Something that can snapshot the save data into a backup archive.
pub trait BackupProducer: Send + Sync {
    /// Take one backup; `false` on any failure (details are logged).
    fn produce_backup(&self) -> BoxFuture<'_, bool>;
}
