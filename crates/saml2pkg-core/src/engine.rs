use crate::cache::ReleaseCache;
use crate::concurrency::{LifecycleLock, DEFAULT_LOCK_TIMEOUT};
use crate::config::{ConfigManager, RestoreStatus};
use crate::installer::{InstallOutcome, PackageInstaller};
use crate::CoreError;
use saml2pkg_host::{HostPlatform, PackageBackend};
use saml2pkg_remote::ReleaseSource;
use saml2pkg_schema::{PkgVersion, Saml2Config};
use saml2pkg_store::{CachedCatalog, StoreLayout};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Snapshot of installed and available versions, for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub installed: Option<String>,
    pub latest: Option<String>,
    pub latest_date: Option<String>,
    pub update_available: bool,
    pub supported: Vec<String>,
    pub host_version: Option<String>,
    pub cache_fetched_at: Option<String>,
    pub backup_created_at: Option<String>,
    pub pending_recovery: usize,
}

/// Entry point for every lifecycle operation.
///
/// Each mutating method takes the lifecycle lock for its whole duration and
/// first resolves installs left behind by an interrupted run.
pub struct Engine {
    layout: StoreLayout,
    config: ConfigManager,
    cache: ReleaseCache,
    installer: PackageInstaller,
    lock_timeout: Duration,
}

impl Engine {
    pub fn new(
        layout: StoreLayout,
        source: Box<dyn ReleaseSource>,
        backend: Box<dyn PackageBackend>,
        platform: HostPlatform,
    ) -> Self {
        Self {
            config: ConfigManager::new(&layout),
            cache: ReleaseCache::new(&layout, source, platform),
            installer: PackageInstaller::new(&layout, backend),
            layout,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_prereleases(mut self, include: bool) -> Self {
        self.cache = self.cache.with_prereleases(include);
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn cache(&self) -> &ReleaseCache {
        &self.cache
    }

    pub fn installer(&self) -> &PackageInstaller {
        &self.installer
    }

    pub fn acquire_lock(&self) -> Result<LifecycleLock, CoreError> {
        self.layout.initialize()?;
        LifecycleLock::acquire(&self.layout.lock_file(), self.lock_timeout)
    }

    /// Lock and recover. Config and cache operations only warn when
    /// recovery fails; installs refuse to run on top of it.
    fn begin(&self, strict: bool) -> Result<LifecycleLock, CoreError> {
        let lock = self.acquire_lock()?;
        match self.installer.recover(&lock) {
            Ok(0) => {}
            Ok(n) => debug!("resolved {n} interrupted install(s)"),
            Err(e) if strict => return Err(e),
            Err(e) => warn!("recovery of interrupted install failed: {e}"),
        }
        Ok(lock)
    }

    pub fn backup(&self) -> Result<bool, CoreError> {
        let lock = self.begin(false)?;
        Ok(self.config.backup(&lock))
    }

    pub fn restore(&self) -> Result<RestoreStatus, CoreError> {
        let lock = self.begin(false)?;
        Ok(self.config.restore(&lock))
    }

    pub fn save_config(&self, candidate: &Saml2Config) -> Result<(), CoreError> {
        ConfigManager::validate(candidate)?;
        let lock = self.begin(false)?;
        self.config.save(&lock, candidate)
    }

    pub fn load_config(&self) -> Result<Saml2Config, CoreError> {
        self.config.load()
    }

    pub fn refresh_cache(&self) -> Result<CachedCatalog, CoreError> {
        let lock = self.begin(false)?;
        self.cache.refresh(&lock)
    }

    pub fn update(&self) -> Result<InstallOutcome, CoreError> {
        let lock = self.begin(true)?;
        self.installer.update(&lock, &self.cache)
    }

    /// Install `version`. A malformed version fails before the lock is taken
    /// or the state directory is touched.
    pub fn revert(&self, version: &str) -> Result<InstallOutcome, CoreError> {
        PkgVersion::parse(version)?;
        let lock = self.begin(true)?;
        self.installer.revert(&lock, &self.cache, version)
    }

    pub fn installed_version(&self) -> Result<Option<String>, CoreError> {
        self.installer.installed_version()
    }

    pub fn is_update_available(&self) -> Result<bool, CoreError> {
        match self.installed_version()? {
            Some(v) => self.cache.is_update_available(&v),
            None => Ok(self.cache.latest_version()?.is_some()),
        }
    }

    /// Report for `status`. Runs without the lock. Registry or platform
    /// trouble leaves the catalog fields empty instead of failing.
    pub fn status(&self) -> Result<EngineStatus, CoreError> {
        let installed = self.installed_version()?;
        let host_version = match self.cache.platform().version() {
            Ok(v) => Some(v.to_string()),
            Err(e) => {
                warn!("{e}");
                None
            }
        };

        let supported = match self.cache.supported_releases() {
            Ok(r) => r,
            Err(e) => {
                warn!("release catalog unavailable: {e}");
                Vec::new()
            }
        };
        let latest = supported.first();
        let update_available = match (&installed, latest) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(cur), Some(l)) => PkgVersion::parse(cur).map_or(true, |v| l.version > v),
        };

        let backup_created_at = match self.config.latest_backup() {
            Ok(b) => b.map(|s| s.created_at),
            Err(e) => {
                warn!("{e}");
                None
            }
        };

        Ok(EngineStatus {
            latest: latest.map(|r| r.version.to_string()),
            latest_date: latest.map(|r| r.release_date.clone()),
            update_available,
            supported: supported.iter().map(|r| r.version.to_string()).collect(),
            host_version,
            cache_fetched_at: self.cache.read_cache().map(|c| c.fetched_at),
            backup_created_at,
            pending_recovery: self.installer.pending()?,
            installed,
        })
    }
}
