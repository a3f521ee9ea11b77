use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use saml2pkg_schema::Release;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, warn};

/// The last release catalog fetched from the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedCatalog {
    pub fetched_at: String,
    pub releases: Vec<Release>,
}

/// Persisted copy of the release catalog.
///
/// Reads never fail: a missing, unreadable or corrupt cache is reported as
/// absent so that callers fall back to a fresh fetch.
pub struct ReleaseCacheFile {
    layout: StoreLayout,
}

impl ReleaseCacheFile {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn write(&self, releases: Vec<Release>) -> Result<CachedCatalog, StoreError> {
        let catalog = CachedCatalog {
            fetched_at: chrono::Utc::now().to_rfc3339(),
            releases,
        };
        let content = serde_json::to_string_pretty(&catalog)?;
        write_atomic(&self.layout.release_cache_file(), content.as_bytes())?;
        debug!("cached {} releases", catalog.releases.len());
        Ok(catalog)
    }

    pub fn read(&self) -> Option<CachedCatalog> {
        let path = self.layout.release_cache_file();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("unreadable release cache {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!("corrupt release cache {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saml2pkg_schema::PkgVersion;

    fn setup() -> (tempfile::TempDir, ReleaseCacheFile, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ReleaseCacheFile::new(layout.clone()), layout)
    }

    fn release(version: &str) -> Release {
        Release {
            version: PkgVersion::parse(version).unwrap(),
            release_date: "2025-03-01".to_owned(),
            platform_constraint: ">=2.7".to_owned(),
            artifact_url: format!("https://example.com/{version}.pkg"),
        }
    }

    #[test]
    fn missing_cache_reads_none() {
        let (_dir, cache, _layout) = setup();
        assert!(cache.read().is_none());
    }

    #[test]
    fn write_then_read_returns_catalog() {
        let (_dir, cache, _layout) = setup();
        let written = cache.write(vec![release("1.1.0"), release("1.0.0")]).unwrap();
        let read = cache.read().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.releases.len(), 2);
    }

    #[test]
    fn corrupt_cache_reads_none() {
        let (_dir, cache, layout) = setup();
        fs::write(layout.release_cache_file(), b"\x00\x01 not json").unwrap();
        assert!(cache.read().is_none());
    }

    #[test]
    fn cache_with_invalid_version_reads_none() {
        let (_dir, cache, layout) = setup();
        let json = r#"{"fetched_at":"2025-01-01T00:00:00Z","releases":[{"version":"x.y","release_date":"","platform_constraint":"*","artifact_url":""}]}"#;
        fs::write(layout.release_cache_file(), json).unwrap();
        assert!(cache.read().is_none());
    }
}
