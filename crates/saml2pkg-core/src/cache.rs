use crate::concurrency::LifecycleLock;
use crate::CoreError;
use saml2pkg_host::HostPlatform;
use saml2pkg_remote::ReleaseSource;
use saml2pkg_schema::{sort_catalog, PkgVersion, Release};
use saml2pkg_store::{CachedCatalog, ReleaseCacheFile, StoreLayout};
use tracing::{debug, info};

/// Release catalog for this host, backed by the on-disk cache.
///
/// Queries use the cached catalog when one exists and fall back to a fresh
/// fetch (which repopulates the cache) when it is absent or unreadable.
/// There is no expiry: the cache changes only through [`refresh`] or that
/// fallback, and `refreshcache` runs from cron to keep it current.
///
/// [`refresh`]: Self::refresh
pub struct ReleaseCache {
    file: ReleaseCacheFile,
    source: Box<dyn ReleaseSource>,
    platform: HostPlatform,
    include_prereleases: bool,
}

impl ReleaseCache {
    pub fn new(layout: &StoreLayout, source: Box<dyn ReleaseSource>, platform: HostPlatform) -> Self {
        Self {
            file: ReleaseCacheFile::new(layout.clone()),
            source,
            platform,
            include_prereleases: false,
        }
    }

    #[must_use]
    pub fn with_prereleases(mut self, include: bool) -> Self {
        self.include_prereleases = include;
        self
    }

    pub fn source(&self) -> &dyn ReleaseSource {
        self.source.as_ref()
    }

    pub fn platform(&self) -> &HostPlatform {
        &self.platform
    }

    /// Fetch the catalog from the registry, keep the releases this host can
    /// install, newest first. An empty registry is an empty catalog, not an
    /// error.
    pub fn fetch_releases(&self) -> Result<Vec<Release>, CoreError> {
        let host = self.platform.version()?;
        let mut releases = self.source.list_releases(self.include_prereleases)?;
        let total = releases.len();
        releases.retain(|r| r.supports(&host));
        sort_catalog(&mut releases);
        debug!(
            "{} of {total} releases support host {host}",
            releases.len()
        );
        Ok(releases)
    }

    pub fn write_cache(&self, releases: Vec<Release>) -> Result<CachedCatalog, CoreError> {
        Ok(self.file.write(releases)?)
    }

    pub fn read_cache(&self) -> Option<CachedCatalog> {
        self.file.read()
    }

    /// Fetch and store. Used by `refreshcache`.
    pub fn refresh(&self, _lock: &LifecycleLock) -> Result<CachedCatalog, CoreError> {
        self.fetch_and_store()
    }

    fn fetch_and_store(&self) -> Result<CachedCatalog, CoreError> {
        let releases = self.fetch_releases()?;
        let catalog = self.write_cache(releases)?;
        info!("release cache refreshed ({} releases)", catalog.releases.len());
        Ok(catalog)
    }

    /// The catalog, from cache when present.
    pub fn supported_releases(&self) -> Result<Vec<Release>, CoreError> {
        match self.cached_for_host()? {
            Some(releases) => Ok(releases),
            None => Ok(self.fetch_and_store()?.releases),
        }
    }

    /// Cached releases that still install on this host, newest first.
    ///
    /// The host may have been upgraded since the cache was written, so every
    /// constraint is checked again. A cache whose releases all target another
    /// platform reads as absent.
    fn cached_for_host(&self) -> Result<Option<Vec<Release>>, CoreError> {
        let Some(catalog) = self.read_cache() else {
            return Ok(None);
        };
        let host = self.platform.version()?;
        let total = catalog.releases.len();
        let mut releases = catalog.releases;
        releases.retain(|r| r.supports(&host));
        if total > 0 && releases.is_empty() {
            debug!("no cached release supports host {host}, refetching");
            return Ok(None);
        }
        sort_catalog(&mut releases);
        Ok(Some(releases))
    }

    pub fn latest_version(&self) -> Result<Option<PkgVersion>, CoreError> {
        Ok(self
            .supported_releases()?
            .into_iter()
            .next()
            .map(|r| r.version))
    }

    pub fn release_date(&self, version: &str) -> Result<Option<String>, CoreError> {
        let wanted = PkgVersion::parse(version)?;
        Ok(self
            .supported_releases()?
            .into_iter()
            .find(|r| r.version == wanted)
            .map(|r| r.release_date))
    }

    /// Locate a release for installation. A cache miss triggers one fresh
    /// fetch so that versions published since the last refresh are found.
    pub fn find_release(&self, version: &PkgVersion) -> Result<Option<Release>, CoreError> {
        if let Some(releases) = self.cached_for_host()? {
            if let Some(release) = releases.into_iter().find(|r| r.version == *version) {
                return Ok(Some(release));
            }
            debug!("{version} not in cached catalog, refetching");
        }
        Ok(self
            .fetch_and_store()?
            .releases
            .into_iter()
            .find(|r| r.version == *version))
    }

    pub fn is_update_available(&self, installed: &str) -> Result<bool, CoreError> {
        let installed = PkgVersion::parse(installed)?;
        Ok(self.latest_version()?.is_some_and(|latest| latest > installed))
    }
}
