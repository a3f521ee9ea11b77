use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of the pfsense-saml2 state directory.
///
/// On the appliance this is `/var/cache/pfSense-pkg-saml2-auth`. Subdirectories
/// are created lazily by [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The live configuration record.
    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// The latest backup snapshot.
    #[inline]
    pub fn backup_file(&self) -> PathBuf {
        self.root.join("backup.json")
    }

    #[inline]
    pub fn release_cache_file(&self) -> PathBuf {
        self.root.join("releases.json")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    #[inline]
    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    /// Isolated area where downloaded artifacts are unpacked and verified
    /// before activation.
    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    #[inline]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.journal_dir())?;
        fs::create_dir_all(self.staging_dir())?;
        fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }
}
