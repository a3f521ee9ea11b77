use crate::HostError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the manifest every package artifact carries at its root.
pub const MANIFEST_FILE: &str = "+MANIFEST";

/// Identity of a package build, read from [`MANIFEST_FILE`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
}

/// An artifact unpacked into an isolated staging directory.
#[derive(Debug, Clone)]
pub struct StagedPackage {
    pub path: PathBuf,
    pub manifest: PackageManifest,
}

/// Installs and activates package builds on the host.
///
/// The installer drives a backend through
/// `stage → verify_stage → activate → reload → verify_installed`; nothing
/// before `activate` may touch the active installation.
pub trait PackageBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Version of the active installation, `None` when nothing is installed.
    fn installed_version(&self) -> Result<Option<String>, HostError>;

    /// Unpack `artifact` into `staging_dir`.
    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<StagedPackage, HostError>;

    /// Check that the staged build is this package at `expected_version`.
    fn verify_stage(&self, staged: &StagedPackage, expected_version: &str)
        -> Result<(), HostError>;

    /// Make the staged build the active installation.
    fn activate(&self, staged: &StagedPackage) -> Result<(), HostError>;

    /// Make a previously installed version active again.
    fn reactivate(&self, version: &str) -> Result<(), HostError>;

    /// Remove the active installation pointer. Used to roll back a first
    /// install, where no previous version exists.
    fn deactivate(&self) -> Result<(), HostError>;

    /// Tell dependent services to pick up the active installation.
    fn reload(&self) -> Result<(), HostError>;

    fn verify_installed(&self, version: &str) -> Result<(), HostError>;

    fn discard_stage(&self, staged: &StagedPackage) -> Result<(), HostError>;
}

impl<T: PackageBackend + ?Sized> PackageBackend for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn installed_version(&self) -> Result<Option<String>, HostError> {
        (**self).installed_version()
    }

    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<StagedPackage, HostError> {
        (**self).stage(artifact, staging_dir)
    }

    fn verify_stage(
        &self,
        staged: &StagedPackage,
        expected_version: &str,
    ) -> Result<(), HostError> {
        (**self).verify_stage(staged, expected_version)
    }

    fn activate(&self, staged: &StagedPackage) -> Result<(), HostError> {
        (**self).activate(staged)
    }

    fn reactivate(&self, version: &str) -> Result<(), HostError> {
        (**self).reactivate(version)
    }

    fn deactivate(&self) -> Result<(), HostError> {
        (**self).deactivate()
    }

    fn reload(&self) -> Result<(), HostError> {
        (**self).reload()
    }

    fn verify_installed(&self, version: &str) -> Result<(), HostError> {
        (**self).verify_installed(version)
    }

    fn discard_stage(&self, staged: &StagedPackage) -> Result<(), HostError> {
        (**self).discard_stage(staged)
    }
}
