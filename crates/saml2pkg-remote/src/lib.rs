//! Release registry access for pfsense-saml2.
//!
//! A registry publishes the package's release catalog, either as a plain JSON
//! array of release records or as a GitHub releases API listing. This crate
//! provides the [`ReleaseSource`] trait with HTTP and `file://` backends, a
//! defensive catalog parser, and an in-memory [`MockSource`] for tests.

pub mod config;
pub mod file;
pub mod http;
pub mod mock;
pub mod registry;

pub use config::{RemoteConfig, DEFAULT_TIMEOUT_SECS};
pub use file::FileSource;
pub use http::HttpSource;
pub use mock::MockSource;
pub use registry::parse_catalog;

use saml2pkg_schema::Release;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Upper bound on a registry document. Anything larger is rejected unread.
pub const MAX_DOCUMENT_BYTES: u64 = 4 * 1024 * 1024;

/// Upper bound on a downloaded package artifact.
pub const MAX_ARTIFACT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed release catalog: {0}")]
    Malformed(String),
    #[error("{what} exceeds the {limit} byte limit")]
    TooLarge { what: String, limit: u64 },
    #[error("remote config error: {0}")]
    Config(String),
}

/// Where release catalogs and package artifacts come from.
pub trait ReleaseSource: Send + Sync {
    /// Retrieve the raw registry document.
    fn fetch_document(&self) -> Result<Vec<u8>, RemoteError>;

    /// Download the artifact at `artifact_url` to `dest`. Returns the number
    /// of bytes written. `dest` is replaced atomically.
    fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, RemoteError>;

    /// Fetch and parse the catalog. Drafts are always dropped; prereleases
    /// only unless `include_prereleases` is set.
    fn list_releases(&self, include_prereleases: bool) -> Result<Vec<Release>, RemoteError> {
        let body = self.fetch_document()?;
        parse_catalog(&body, include_prereleases)
    }
}

/// Lets a caller keep a handle on a source it hands to the engine.
impl<T: ReleaseSource + ?Sized> ReleaseSource for Arc<T> {
    fn fetch_document(&self) -> Result<Vec<u8>, RemoteError> {
        (**self).fetch_document()
    }

    fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, RemoteError> {
        (**self).download(artifact_url, dest)
    }

    fn list_releases(&self, include_prereleases: bool) -> Result<Vec<Release>, RemoteError> {
        (**self).list_releases(include_prereleases)
    }
}

/// Pick a source for a registry URL by scheme.
pub fn select_source(config: &RemoteConfig) -> Result<Box<dyn ReleaseSource>, RemoteError> {
    let parsed = url::Url::parse(&config.url)
        .map_err(|e| RemoteError::Config(format!("invalid registry URL '{}': {e}", config.url)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Box::new(HttpSource::new(config.clone()))),
        "file" => {
            let path = parsed.to_file_path().map_err(|()| {
                RemoteError::Config(format!("invalid file URL '{}'", config.url))
            })?;
            Ok(Box::new(FileSource::new(path)))
        }
        other => Err(RemoteError::Config(format!(
            "unsupported registry scheme '{other}'"
        ))),
    }
}

/// Read at most `limit` bytes from `reader`, failing if more are available.
pub(crate) fn read_capped(
    reader: impl Read,
    limit: u64,
    what: &str,
) -> Result<Vec<u8>, RemoteError> {
    let mut body = Vec::new();
    reader.take(limit + 1).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(RemoteError::TooLarge {
            what: what.to_owned(),
            limit,
        });
    }
    Ok(body)
}

/// Stream `reader` into `dest` through a temporary file in the same
/// directory, enforcing [`MAX_ARTIFACT_BYTES`].
pub(crate) fn persist_capped(reader: impl Read, dest: &Path) -> Result<u64, RemoteError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let written = std::io::copy(&mut reader.take(MAX_ARTIFACT_BYTES + 1), &mut tmp)?;
    if written > MAX_ARTIFACT_BYTES {
        return Err(RemoteError::TooLarge {
            what: format!("artifact {}", dest.display()),
            limit: MAX_ARTIFACT_BYTES,
        });
    }
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| RemoteError::Io(e.error))?;
    Ok(written)
}
