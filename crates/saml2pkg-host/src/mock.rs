use crate::backend::{PackageBackend, PackageManifest, StagedPackage, MANIFEST_FILE};
use crate::directory::same_version;
use crate::HostError;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Points at which [`MockBackend`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Stage,
    VerifyStage,
    Activate,
    Reload,
    VerifyInstalled,
    Reactivate,
}

#[derive(Default)]
struct MockState {
    installed: Option<String>,
    releases: BTreeSet<String>,
    failures: HashSet<FailPoint>,
    reloads: usize,
    activations: usize,
}

/// In-memory package backend for tests.
///
/// Artifacts are plain JSON [`PackageManifest`] documents rather than
/// archives; staging copies the manifest into the staging directory so the
/// installer's filesystem bookkeeping is still exercised.
pub struct MockBackend {
    package_name: String,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(package_name: &str) -> Self {
        Self {
            package_name: package_name.to_owned(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// A backend with `version` already installed and active.
    pub fn with_installed(package_name: &str, version: &str) -> Self {
        let backend = Self::new(package_name);
        if let Ok(mut state) = backend.state.lock() {
            state.installed = Some(version.to_owned());
            state.releases.insert(version.to_owned());
        }
        backend
    }

    pub fn fail_at(&self, point: FailPoint) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(point);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.clear();
        }
    }

    /// Force the active version, bypassing staging. Simulates a crash that
    /// left a half-finished swap behind.
    pub fn force_installed(&self, version: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.installed = Some(version.to_owned());
            state.releases.insert(version.to_owned());
        }
    }

    pub fn reload_count(&self) -> usize {
        self.state.lock().map(|s| s.reloads).unwrap_or(0)
    }

    pub fn activation_count(&self) -> usize {
        self.state.lock().map(|s| s.activations).unwrap_or(0)
    }

    /// Artifact bytes this backend accepts for `version`.
    pub fn artifact_for(package_name: &str, version: &str) -> Vec<u8> {
        serde_json::to_vec(&PackageManifest {
            name: package_name.to_owned(),
            version: version.to_owned(),
        })
        .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, HostError> {
        self.state
            .lock()
            .map_err(|e| HostError::CommandFailed(format!("mutex poisoned: {e}")))
    }

    fn check(&self, point: FailPoint) -> Result<(), HostError> {
        if self.lock()?.failures.contains(&point) {
            return Err(HostError::Injected(format!("{point:?}")));
        }
        Ok(())
    }
}

impl PackageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn installed_version(&self) -> Result<Option<String>, HostError> {
        Ok(self.lock()?.installed.clone())
    }

    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<StagedPackage, HostError> {
        self.check(FailPoint::Stage)?;
        let data = fs::read(artifact)?;
        let manifest: PackageManifest = serde_json::from_slice(&data)
            .map_err(|e| HostError::Archive(format!("mock artifact: {e}")))?;
        fs::create_dir_all(staging_dir)?;
        fs::write(staging_dir.join(MANIFEST_FILE), &data)?;
        Ok(StagedPackage {
            path: staging_dir.to_path_buf(),
            manifest,
        })
    }

    fn verify_stage(
        &self,
        staged: &StagedPackage,
        expected_version: &str,
    ) -> Result<(), HostError> {
        self.check(FailPoint::VerifyStage)?;
        if staged.manifest.name != self.package_name
            || !same_version(&staged.manifest.version, expected_version)
        {
            return Err(HostError::InvalidStage(format!(
                "expected {} {expected_version}, got {} {}",
                self.package_name, staged.manifest.name, staged.manifest.version
            )));
        }
        Ok(())
    }

    fn activate(&self, staged: &StagedPackage) -> Result<(), HostError> {
        let mut state = self.lock()?;
        state.activations += 1;
        if state.failures.contains(&FailPoint::Activate) {
            // The swap went through before the failure surfaced.
            state.installed = Some(staged.manifest.version.clone());
            return Err(HostError::Injected("Activate".to_owned()));
        }
        state.installed = Some(staged.manifest.version.clone());
        state.releases.insert(staged.manifest.version.clone());
        Ok(())
    }

    fn reactivate(&self, version: &str) -> Result<(), HostError> {
        self.check(FailPoint::Reactivate)?;
        let mut state = self.lock()?;
        if !state.releases.contains(version) {
            return Err(HostError::NotInstalled(version.to_owned()));
        }
        state.installed = Some(version.to_owned());
        Ok(())
    }

    fn deactivate(&self) -> Result<(), HostError> {
        self.check(FailPoint::Reactivate)?;
        self.lock()?.installed = None;
        Ok(())
    }

    fn reload(&self) -> Result<(), HostError> {
        self.check(FailPoint::Reload)?;
        self.lock()?.reloads += 1;
        Ok(())
    }

    fn verify_installed(&self, version: &str) -> Result<(), HostError> {
        self.check(FailPoint::VerifyInstalled)?;
        match self.lock()?.installed {
            Some(ref v) if same_version(v, version) => Ok(()),
            _ => Err(HostError::NotInstalled(version.to_owned())),
        }
    }

    fn discard_stage(&self, staged: &StagedPackage) -> Result<(), HostError> {
        if staged.path.exists() {
            fs::remove_dir_all(&staged.path)?;
        }
        Ok(())
    }
}
