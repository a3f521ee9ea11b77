use crate::HostError;
use saml2pkg_schema::PkgVersion;
use std::fs;
use std::path::PathBuf;

/// Source of the host OS version that releases are matched against.
#[derive(Debug, Clone)]
pub enum HostPlatform {
    /// A version fixed in settings.
    Fixed(String),
    /// First line of a version file, `/etc/version` on pfSense
    /// (for example `2.7.2-RELEASE`).
    VersionFile(PathBuf),
}

impl HostPlatform {
    pub fn version(&self) -> Result<PkgVersion, HostError> {
        let raw = match self {
            Self::Fixed(v) => v.clone(),
            Self::VersionFile(path) => {
                let content = fs::read_to_string(path)
                    .map_err(|e| HostError::Platform(format!("{}: {e}", path.display())))?;
                content.lines().next().unwrap_or_default().trim().to_owned()
            }
        };
        PkgVersion::parse(&raw).map_err(|e| HostError::Platform(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_version() {
        let v = HostPlatform::Fixed("24.11".to_owned()).version().unwrap();
        assert_eq!(v.as_str(), "24.11");
    }

    #[test]
    fn version_file_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version");
        fs::write(&path, "2.7.2-RELEASE\nbuilt on Tue Dec 5\n").unwrap();
        let v = HostPlatform::VersionFile(path).version().unwrap();
        assert_eq!(v.as_str(), "2.7.2-RELEASE");
    }

    #[test]
    fn missing_or_garbled_file_is_platform_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = HostPlatform::VersionFile(dir.path().join("absent"));
        assert!(matches!(missing.version(), Err(HostError::Platform(_))));

        let path = dir.path().join("version");
        fs::write(&path, "pfSense\n").unwrap();
        assert!(matches!(
            HostPlatform::VersionFile(path).version(),
            Err(HostError::Platform(_))
        ));
    }
}
