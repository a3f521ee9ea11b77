use crate::backend::{PackageBackend, PackageManifest, StagedPackage, MANIFEST_FILE};
use crate::{run_command, HostError};
use flate2::read::GzDecoder;
use saml2pkg_schema::PkgVersion;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Package backend that keeps each release in its own directory.
///
/// Layout under `install_root`:
/// * `releases/<version>/` unpacked builds, each with a `+MANIFEST`;
/// * `current` relative symlink to the active release.
///
/// Activation replaces `current` by renaming a freshly created symlink over
/// it, so the active release flips in one step. After each activation only
/// the new release and the one it replaced are kept.
pub struct DirectoryBackend {
    install_root: PathBuf,
    package_name: String,
    reload_command: Option<Vec<String>>,
}

impl DirectoryBackend {
    pub fn new(install_root: impl Into<PathBuf>, package_name: &str) -> Self {
        Self {
            install_root: install_root.into(),
            package_name: package_name.to_owned(),
            reload_command: None,
        }
    }

    #[must_use]
    pub fn with_reload_command(mut self, argv: Vec<String>) -> Self {
        self.reload_command = Some(argv);
        self
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.install_root.join("releases")
    }

    pub fn current_link(&self) -> PathBuf {
        self.install_root.join("current")
    }

    fn release_dir(&self, version: &str) -> PathBuf {
        self.releases_dir().join(version)
    }

    /// Versions present under `releases/`, in directory order.
    pub fn installed_releases(&self) -> Result<Vec<String>, HostError> {
        let dir = self.releases_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(versions)
    }

    /// Directory name of the release `current` points at.
    fn current_release_name(&self) -> Result<Option<String>, HostError> {
        match fs::read_link(self.current_link()) {
            Ok(target) => Ok(target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn swap_current(&self, version: &str) -> Result<(), HostError> {
        let tmp = self.install_root.join(".current.tmp");
        if tmp.symlink_metadata().is_ok() {
            fs::remove_file(&tmp)?;
        }
        symlink(Path::new("releases").join(version), &tmp)?;
        fs::rename(&tmp, self.current_link())?;
        File::open(&self.install_root)?.sync_all()?;
        debug!("current -> releases/{version}");
        Ok(())
    }

    fn prune(&self, keep: &[&str]) {
        let Ok(versions) = self.installed_releases() else {
            return;
        };
        for version in versions {
            if keep.contains(&version.as_str()) {
                continue;
            }
            let dir = self.release_dir(&version);
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("failed to prune release {}: {e}", dir.display());
            } else {
                debug!("pruned release {version}");
            }
        }
    }
}

fn read_manifest(dir: &Path) -> Result<PackageManifest, HostError> {
    let path = dir.join(MANIFEST_FILE);
    let content = match fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(HostError::InvalidStage(format!(
                "{MANIFEST_FILE} missing in {}",
                dir.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&content)
        .map_err(|e| HostError::InvalidStage(format!("unreadable {MANIFEST_FILE}: {e}")))
}

/// A version string becomes a directory name, so it must be one plain path
/// component.
fn check_version_component(version: &str) -> Result<(), HostError> {
    let mut components = Path::new(version).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(HostError::InvalidStage(format!(
            "version '{version}' is not a valid directory name"
        ))),
    }
}

pub(crate) fn same_version(a: &str, b: &str) -> bool {
    match (PkgVersion::parse(a), PkgVersion::parse(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

fn open_archive(artifact: &Path) -> Result<Box<dyn Read>, HostError> {
    let mut file = File::open(artifact)?;
    let mut magic = [0u8; 2];
    let gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == [0x1f, 0x8b],
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(0))?;
    let reader = BufReader::new(file);
    if gzip {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Rename `src` to `dest`, copying when they live on different filesystems.
fn move_dir(src: &Path, dest: &Path) -> Result<(), HostError> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    copy_dir(src, dest)?;
    fs::remove_dir_all(src)?;
    Ok(())
}

fn copy_dir(src: &Path, dest: &Path) -> Result<(), HostError> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copy_dir(&from, &to)?;
        } else if ft.is_symlink() {
            symlink(fs::read_link(&from)?, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

impl PackageBackend for DirectoryBackend {
    fn name(&self) -> &str {
        "directory"
    }

    fn installed_version(&self) -> Result<Option<String>, HostError> {
        let current = self.current_link();
        if current.symlink_metadata().is_err() {
            return Ok(None);
        }
        Ok(Some(read_manifest(&current)?.version))
    }

    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<StagedPackage, HostError> {
        if staging_dir.exists() {
            fs::remove_dir_all(staging_dir)?;
        }
        fs::create_dir_all(staging_dir)?;

        let mut ar = tar::Archive::new(open_archive(artifact)?);
        ar.set_preserve_permissions(true);
        ar.set_preserve_mtime(false);
        ar.set_unpack_xattrs(false);
        ar.unpack(staging_dir)
            .map_err(|e| HostError::Archive(format!("{}: {e}", artifact.display())))?;

        let manifest = read_manifest(staging_dir)?;
        debug!(
            "staged {} {} in {}",
            manifest.name,
            manifest.version,
            staging_dir.display()
        );
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
        let manifest = read_manifest(&staged.path)?;
        if manifest != staged.manifest {
            return Err(HostError::InvalidStage(
                "manifest changed after staging".to_owned(),
            ));
        }
        if manifest.name != self.package_name {
            return Err(HostError::InvalidStage(format!(
                "artifact contains '{}', expected '{}'",
                manifest.name, self.package_name
            )));
        }
        if !same_version(&manifest.version, expected_version) {
            return Err(HostError::InvalidStage(format!(
                "artifact contains version {}, expected {expected_version}",
                manifest.version
            )));
        }
        check_version_component(&manifest.version)
    }

    fn activate(&self, staged: &StagedPackage) -> Result<(), HostError> {
        let version = staged.manifest.version.as_str();
        check_version_component(version)?;
        let previous = self.current_release_name()?;
        if previous.as_deref() == Some(version) {
            return Err(HostError::InvalidStage(format!(
                "version {version} is already active"
            )));
        }

        fs::create_dir_all(self.releases_dir())?;
        let dest = self.release_dir(version);
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        move_dir(&staged.path, &dest)?;
        self.swap_current(version)?;

        let mut keep = vec![version];
        if let Some(ref p) = previous {
            keep.push(p.as_str());
        }
        self.prune(&keep);
        info!("activated {} {version}", self.package_name);
        Ok(())
    }

    fn reactivate(&self, version: &str) -> Result<(), HostError> {
        check_version_component(version)?;
        if !self.release_dir(version).join(MANIFEST_FILE).exists() {
            return Err(HostError::NotInstalled(version.to_owned()));
        }
        self.swap_current(version)?;
        info!("reactivated {} {version}", self.package_name);
        Ok(())
    }

    fn deactivate(&self) -> Result<(), HostError> {
        let current = self.current_link();
        if current.symlink_metadata().is_ok() {
            fs::remove_file(&current)?;
            File::open(&self.install_root)?.sync_all()?;
            info!("deactivated {}", self.package_name);
        }
        Ok(())
    }

    fn reload(&self) -> Result<(), HostError> {
        match self.reload_command {
            Some(ref argv) => run_command(argv),
            None => Ok(()),
        }
    }

    fn verify_installed(&self, version: &str) -> Result<(), HostError> {
        let current = self.current_link();
        if current.symlink_metadata().is_err() {
            return Err(HostError::NotInstalled(version.to_owned()));
        }
        let manifest = read_manifest(&current)?;
        if manifest.name != self.package_name || !same_version(&manifest.version, version) {
            return Err(HostError::NotInstalled(version.to_owned()));
        }
        Ok(())
    }

    fn discard_stage(&self, staged: &StagedPackage) -> Result<(), HostError> {
        if staged.path.exists() {
            fs::remove_dir_all(&staged.path)?;
        }
        Ok(())
    }
}
