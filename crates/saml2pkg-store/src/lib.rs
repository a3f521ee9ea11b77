//! On-disk state for pfsense-saml2.
//!
//! This crate provides the persistence layer: `StoreLayout` for the state
//! directory structure, `ConfigFile` and `BackupFile` for the live configuration
//! and its snapshot, `ReleaseCacheFile` for the cached release catalog, and
//! `InstallJournal`, a write-ahead record of in-flight installs used for crash
//! recovery. Every write goes through [`write_atomic`], so readers never observe
//! a partially written file.

pub mod cache;
pub mod config_file;
pub mod journal;
pub mod layout;

pub use cache::{CachedCatalog, ReleaseCacheFile};
pub use config_file::{BackupFile, BackupSnapshot, ConfigFile};
pub use journal::{InstallJournal, InstallKind, InstallState, JournalEntry, RollbackStep};
pub use layout::StoreLayout;

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until its parent
/// directory has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` so that readers see either the old or the
/// new file, never a mix. The temporary file lives in the same directory so
/// the final rename stays on one filesystem.
pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] saml2pkg_schema::ConfigError),
    #[error("backup snapshot is corrupt: {0}")]
    CorruptSnapshot(String),
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("journal entry not found: {0}")]
    JournalEntryNotFound(String),
}
