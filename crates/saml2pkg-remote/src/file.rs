use crate::{persist_capped, read_capped, ReleaseSource, RemoteError, MAX_DOCUMENT_BYTES};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Registry served from the local filesystem (an offline mirror).
///
/// Artifact URLs may be `file://` URLs, absolute paths, or paths relative to
/// the directory holding the registry document.
pub struct FileSource {
    document: PathBuf,
}

impl FileSource {
    pub fn new(document: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
        }
    }

    fn resolve(&self, artifact_url: &str) -> Result<PathBuf, RemoteError> {
        if artifact_url.starts_with("file:") {
            let parsed = url::Url::parse(artifact_url)
                .map_err(|e| RemoteError::Config(format!("invalid artifact URL: {e}")))?;
            return parsed
                .to_file_path()
                .map_err(|()| RemoteError::Config(format!("invalid artifact URL '{artifact_url}'")));
        }
        if artifact_url.contains("://") {
            return Err(RemoteError::Config(format!(
                "offline mirror cannot fetch '{artifact_url}'"
            )));
        }
        let path = Path::new(artifact_url);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base = self.document.parent().unwrap_or(Path::new("."));
        Ok(base.join(path))
    }
}

fn open(path: &Path) -> Result<File, RemoteError> {
    File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            RemoteError::NotFound(path.display().to_string())
        } else {
            RemoteError::Io(e)
        }
    })
}

impl ReleaseSource for FileSource {
    fn fetch_document(&self) -> Result<Vec<u8>, RemoteError> {
        debug!("reading registry {}", self.document.display());
        let file = open(&self.document)?;
        read_capped(file, MAX_DOCUMENT_BYTES, "registry document")
    }

    fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, RemoteError> {
        let src = self.resolve(artifact_url)?;
        debug!("copying {} -> {}", src.display(), dest.display());
        let file = open(&src)?;
        persist_capped(file, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_document_and_relative_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("releases.json");
        fs::write(&doc, "[]").unwrap();
        fs::create_dir_all(dir.path().join("pkgs")).unwrap();
        fs::write(dir.path().join("pkgs/1.0.0.pkg"), b"archive").unwrap();

        let source = FileSource::new(&doc);
        assert_eq!(source.fetch_document().unwrap(), b"[]");

        let dest = dir.path().join("out/1.0.0.pkg");
        assert_eq!(source.download("pkgs/1.0.0.pkg", &dest).unwrap(), 7);
        assert_eq!(fs::read(&dest).unwrap(), b"archive");
    }

    #[test]
    fn file_url_artifacts_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.pkg");
        fs::write(&artifact, b"x").unwrap();
        let url = url::Url::from_file_path(&artifact).unwrap();

        let source = FileSource::new(dir.path().join("releases.json"));
        let dest = dir.path().join("copy.pkg");
        source.download(url.as_str(), &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"x");
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.json"));
        assert!(matches!(
            source.fetch_document(),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn remote_urls_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("releases.json"));
        assert!(matches!(
            source.download("https://example.com/x.pkg", &dir.path().join("x")),
            Err(RemoteError::Config(_))
        ));
    }
}
