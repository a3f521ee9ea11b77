use crate::concurrency::LifecycleLock;
use crate::CoreError;
use saml2pkg_schema::Saml2Config;
use saml2pkg_store::{BackupFile, BackupSnapshot, ConfigFile, StoreLayout};
use tracing::{info, warn};

/// Outcome of [`ConfigManager::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Success,
    /// No snapshot has ever been taken. Not an error.
    NoBackup,
    /// The snapshot could not be applied; the live configuration is untouched.
    Failure,
}

/// Owner of the live configuration and its backup snapshot.
pub struct ConfigManager {
    config_file: ConfigFile,
    backup_file: BackupFile,
}

impl ConfigManager {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            config_file: ConfigFile::new(layout.clone()),
            backup_file: BackupFile::new(layout.clone()),
        }
    }

    /// The persisted configuration, or defaults when none was ever saved.
    pub fn load(&self) -> Result<Saml2Config, CoreError> {
        Ok(self.config_file.load()?.unwrap_or_default())
    }

    pub fn validate(candidate: &Saml2Config) -> Result<(), CoreError> {
        candidate.validate()?;
        Ok(())
    }

    /// Validate and persist. On any error the previous file is intact.
    pub fn save(&self, _lock: &LifecycleLock, candidate: &Saml2Config) -> Result<(), CoreError> {
        Self::validate(candidate)?;
        self.config_file.store(candidate)?;
        info!("configuration saved");
        Ok(())
    }

    /// Snapshot the current configuration, replacing any earlier snapshot.
    pub fn backup(&self, _lock: &LifecycleLock) -> bool {
        let result = self
            .load()
            .and_then(|config| BackupSnapshot::new(config).map_err(CoreError::from))
            .and_then(|snapshot| self.backup_file.write(&snapshot).map_err(CoreError::from));
        match result {
            Ok(()) => {
                info!("configuration backed up");
                true
            }
            Err(e) => {
                warn!("backup failed: {e}");
                false
            }
        }
    }

    /// Replace the live configuration with the latest snapshot.
    pub fn restore(&self, lock: &LifecycleLock) -> RestoreStatus {
        let snapshot = match self.backup_file.read() {
            Ok(Some(s)) => s,
            Ok(None) => return RestoreStatus::NoBackup,
            Err(e) => {
                warn!("backup unusable: {e}");
                return RestoreStatus::Failure;
            }
        };
        if let Err(e) = self.save(lock, &snapshot.config) {
            warn!("restore from snapshot of {} failed: {e}", snapshot.created_at);
            return RestoreStatus::Failure;
        }
        info!("configuration restored from snapshot of {}", snapshot.created_at);
        RestoreStatus::Success
    }

    pub fn latest_backup(&self) -> Result<Option<BackupSnapshot>, CoreError> {
        Ok(self.backup_file.read()?)
    }
}
