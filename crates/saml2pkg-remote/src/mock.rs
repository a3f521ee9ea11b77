use crate::{ReleaseSource, RemoteError};
use saml2pkg_schema::Release;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory registry for tests.
///
/// With no document set, fetches fail like an unreachable registry.
#[derive(Default)]
pub struct MockSource {
    document: Mutex<Option<Vec<u8>>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `releases` as a plain catalog.
    pub fn with_releases(releases: &[Release]) -> Self {
        let source = Self::new();
        source.set_releases(releases);
        source
    }

    pub fn set_releases(&self, releases: &[Release]) {
        let body = serde_json::to_vec(releases).unwrap_or_default();
        self.set_document(Some(body));
    }

    pub fn set_document(&self, body: Option<Vec<u8>>) {
        if let Ok(mut doc) = self.document.lock() {
            *doc = body;
        }
    }

    pub fn add_artifact(&self, url: &str, data: Vec<u8>) {
        if let Ok(mut artifacts) = self.artifacts.lock() {
            artifacts.insert(url.to_owned(), data);
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl ReleaseSource for MockSource {
    fn fetch_document(&self) -> Result<Vec<u8>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let doc = self
            .document
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?;
        doc.clone()
            .ok_or_else(|| RemoteError::Http("mock registry unreachable".to_owned()))
    }

    fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let data = self
            .artifacts
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?
            .get(artifact_url)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(artifact_url.to_owned()))?;
        crate::persist_capped(&data[..], dest)
    }
}
