use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use chrono::{DateTime, Utc};
use saml2pkg_schema::Saml2Config;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, warn};

/// The live configuration record.
///
/// An absent file means the package has never been configured; callers treat
/// that as [`Saml2Config::default`].
pub struct ConfigFile {
    layout: StoreLayout,
}

impl ConfigFile {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn load(&self) -> Result<Option<Saml2Config>, StoreError> {
        let path = self.layout.config_file();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Saml2Config::from_json_slice(&bytes)?))
    }

    pub fn store(&self, config: &Saml2Config) -> Result<(), StoreError> {
        let content = config.canonical_json()?;
        write_atomic(&self.layout.config_file(), content.as_bytes())?;
        debug!("stored configuration at {}", self.layout.config_file().display());
        Ok(())
    }
}

/// A point-in-time copy of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupSnapshot {
    pub created_at: String,
    /// blake3 over the canonical configuration JSON. `None` for snapshots
    /// converted from a bare configuration file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub config: Saml2Config,
}

impl BackupSnapshot {
    pub fn new(config: Saml2Config) -> Result<Self, StoreError> {
        let checksum = Self::compute_checksum(&config)?;
        Ok(Self {
            created_at: Utc::now().to_rfc3339(),
            checksum: Some(checksum),
            config,
        })
    }

    fn compute_checksum(config: &Saml2Config) -> Result<String, StoreError> {
        let canonical = config.canonical_json()?;
        Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }

    pub fn verify(&self) -> Result<(), StoreError> {
        if let Some(ref expected) = self.checksum {
            let actual = Self::compute_checksum(&self.config)?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    path: "backup snapshot".to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// The single backup slot. Each write replaces the previous snapshot.
pub struct BackupFile {
    layout: StoreLayout,
}

impl BackupFile {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn write(&self, snapshot: &BackupSnapshot) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        write_atomic(&self.layout.backup_file(), content.as_bytes())?;
        debug!("wrote backup snapshot ({})", snapshot.created_at);
        Ok(())
    }

    /// Read the current snapshot, or `None` when no backup was ever taken.
    ///
    /// A file holding a bare configuration object (the format written by
    /// older releases and by provisioning scripts) is accepted as an
    /// unchecksummed snapshot dated by the file's modification time.
    pub fn read(&self) -> Result<Option<BackupSnapshot>, StoreError> {
        let path = self.layout.backup_file();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<BackupSnapshot>(&bytes) {
            Ok(snapshot) => {
                snapshot.verify()?;
                Ok(Some(snapshot))
            }
            Err(snapshot_err) => match Saml2Config::from_json_slice(&bytes) {
                Ok(config) => {
                    warn!(
                        "{} holds a bare configuration, treating it as a legacy snapshot",
                        path.display()
                    );
                    let created_at = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                        .unwrap_or_default();
                    Ok(Some(BackupSnapshot {
                        created_at,
                        checksum: None,
                        config,
                    }))
                }
                Err(_) => Err(StoreError::CorruptSnapshot(snapshot_err.to_string())),
            },
        }
    }
}
