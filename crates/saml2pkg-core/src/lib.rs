//! Lifecycle engine for the pfSense SAML2 authentication package.
//!
//! This crate ties the schema, store, remote and host crates together:
//! `ConfigManager` for validated configuration with backup and restore,
//! `ReleaseCache` for the platform-filtered release catalog,
//! `PackageInstaller` for journaled install, revert and rollback, the
//! `LifecycleLock` that serializes all of them, and the `Engine` facade used
//! by the CLI.

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod installer;
pub mod lifecycle;

pub use cache::ReleaseCache;
pub use concurrency::{
    install_signal_handler, shutdown_requested, LifecycleLock, DEFAULT_LOCK_TIMEOUT,
};
pub use config::{ConfigManager, RestoreStatus};
pub use engine::{Engine, EngineStatus};
pub use installer::{InstallOutcome, PackageInstaller};
pub use lifecycle::validate_transition;

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(#[from] saml2pkg_schema::ConfigError),
    #[error("invalid version: {0}")]
    Version(#[from] saml2pkg_schema::VersionError),
    #[error("store error: {0}")]
    Store(#[from] saml2pkg_store::StoreError),
    #[error("failed to fetch releases: {0}")]
    Fetch(#[from] saml2pkg_remote::RemoteError),
    #[error("host error: {0}")]
    Host(#[from] saml2pkg_host::HostError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid install transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{0}")]
    Update(String),
    #[error("{0}")]
    RollbackFailed(String),
    #[error("lifecycle operation already in progress")]
    LockHeld,
    #[error("interrupted before the installation was modified")]
    Interrupted,
}

/// Coarse classification of a [`CoreError`], used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was changed.
    Validation,
    /// Local I/O, host or network trouble.
    System,
    /// An install did not happen; the system is as it was.
    Update,
    /// An install failed and so did the automatic rollback.
    RollbackFailed,
    LockHeld,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::System => "system",
            Self::Update => "update",
            Self::RollbackFailed => "rollback-failed",
            Self::LockHeld => "lock-held",
        };
        f.write_str(s)
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Version(_) => ErrorKind::Validation,
            Self::Update(_) | Self::Interrupted => ErrorKind::Update,
            Self::RollbackFailed(_) => ErrorKind::RollbackFailed,
            Self::LockHeld => ErrorKind::LockHeld,
            Self::Store(_)
            | Self::Fetch(_)
            | Self::Host(_)
            | Self::Io(_)
            | Self::InvalidTransition { .. } => ErrorKind::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            CoreError::Version(saml2pkg_schema::VersionError::Empty).kind(),
            ErrorKind::Validation
        );
        assert_eq!(CoreError::LockHeld.kind(), ErrorKind::LockHeld);
        assert_eq!(CoreError::Update("x".to_owned()).kind(), ErrorKind::Update);
        assert_eq!(
            CoreError::RollbackFailed("x".to_owned()).kind(),
            ErrorKind::RollbackFailed
        );
        assert_eq!(
            CoreError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::System
        );
    }

    #[test]
    fn lock_held_message() {
        assert_eq!(
            CoreError::LockHeld.to_string(),
            "lifecycle operation already in progress"
        );
    }
}
