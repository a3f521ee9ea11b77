use saml2pkg_core::Engine;
use saml2pkg_host::{parse_command, CronFileScheduler, DirectoryBackend, HostPlatform};
use saml2pkg_remote::{select_source, RemoteConfig, DEFAULT_TIMEOUT_SECS};
use saml2pkg_store::StoreLayout;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_SETTINGS_PATH: &str = "/usr/local/etc/pfsense-saml2.toml";
pub const SETTINGS_ENV: &str = "PFSENSE_SAML2_SETTINGS";

/// Tool settings, read from a TOML file. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Holds config.json, backup.json, releases.json, the lock and the journal.
    pub state_dir: PathBuf,
    /// Package releases are unpacked under `<install_root>/releases`.
    pub install_root: PathBuf,
    pub package_name: String,
    /// `https://`, `http://` or `file://` URL of the release catalog.
    pub registry_url: String,
    pub auth_token: Option<String>,
    /// Registry connect and response timeout, in seconds.
    pub http_timeout_secs: u64,
    pub include_prereleases: bool,
    /// Overrides `host_version_file` when set.
    pub host_version: Option<String>,
    pub host_version_file: PathBuf,
    /// Run after every activation, e.g. to restart the web GUI.
    pub reload_command: Option<String>,
    pub lock_timeout_ms: u64,
    pub cron_file: PathBuf,
    pub cron_apply_command: Option<String>,
    pub refresh_minute: String,
    pub refresh_hour: String,

    /// File these settings came from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/cache/pfSense-pkg-saml2-auth"),
            install_root: PathBuf::from("/usr/local/share/pfSense-pkg-saml2-auth"),
            package_name: "pfSense-pkg-saml2-auth".to_owned(),
            registry_url: "https://api.github.com/repos/pfrest/pfSense-pkg-saml2-auth/releases"
                .to_owned(),
            auth_token: None,
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            include_prereleases: false,
            host_version: None,
            host_version_file: PathBuf::from("/etc/version"),
            reload_command: None,
            lock_timeout_ms: 2000,
            cron_file: PathBuf::from("/etc/cron.d/pfsense-saml2"),
            cron_apply_command: None,
            refresh_minute: "0".to_owned(),
            refresh_hour: "*/6".to_owned(),
            source: None,
        }
    }
}

impl Settings {
    /// Resolve and load the settings file: `explicit`, then
    /// `$PFSENSE_SAML2_SETTINGS`, then the default path. Only the default path
    /// may be missing, in which case defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self, String> {
        let from_env = std::env::var_os(SETTINGS_ENV).map(PathBuf::from);
        let (path, required) = match (explicit, from_env) {
            (Some(p), _) => (p.to_path_buf(), true),
            (None, Some(p)) => (p, true),
            (None, None) => (PathBuf::from(DEFAULT_SETTINGS_PATH), false),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound && !required => {
                debug!("no settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(format!("settings error: {}: {e}", path.display())),
        };
        let mut settings = Self::from_toml_str(&content)
            .map_err(|e| format!("settings error: {}: {e}", path.display()))?;
        settings.source = Some(path);
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.state_dir)
    }

    pub fn platform(&self) -> HostPlatform {
        match self.host_version {
            Some(ref v) => HostPlatform::Fixed(v.clone()),
            None => HostPlatform::VersionFile(self.host_version_file.clone()),
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        let config = RemoteConfig::new(&self.registry_url)
            .with_timeout(Duration::from_secs(self.http_timeout_secs));
        match self.auth_token {
            Some(ref token) => config.with_token(token),
            None => config,
        }
    }

    pub fn backend(&self) -> Result<DirectoryBackend, String> {
        let backend = DirectoryBackend::new(&self.install_root, &self.package_name);
        match self.reload_command {
            Some(ref line) => {
                let argv = parse_command(line)
                    .ok_or_else(|| "settings error: reload_command is empty".to_owned())?;
                Ok(backend.with_reload_command(argv))
            }
            None => Ok(backend),
        }
    }

    pub fn scheduler(&self) -> Result<CronFileScheduler, String> {
        let scheduler = CronFileScheduler::open(&self.cron_file).map_err(|e| e.to_string())?;
        match self.cron_apply_command {
            Some(ref line) => {
                let argv = parse_command(line)
                    .ok_or_else(|| "settings error: cron_apply_command is empty".to_owned())?;
                Ok(scheduler.with_apply_command(argv))
            }
            None => Ok(scheduler),
        }
    }

    pub fn engine(&self) -> Result<Engine, String> {
        let source = select_source(&self.remote_config())
            .map_err(|e| format!("settings error: {e}"))?;
        Ok(Engine::new(
            self.layout(),
            source,
            Box::new(self.backend()?),
            self.platform(),
        )
        .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
        .with_prereleases(self.include_prereleases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let s = Settings::from_toml_str(
            r#"
state_dir = "/tmp/saml2"
registry_url = "file:///srv/mirror/releases.json"
host_version = "2.7.2-RELEASE"
reload_command = "/usr/local/sbin/pfSsh.php playback svc restart webgui"
lock_timeout_ms = 500
http_timeout_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(s.state_dir, PathBuf::from("/tmp/saml2"));
        assert_eq!(s.lock_timeout_ms, 500);
        assert_eq!(s.remote_config().timeout(), Duration::from_secs(5));
        assert_eq!(s.package_name, "pfSense-pkg-saml2-auth");
        assert!(matches!(s.platform(), HostPlatform::Fixed(ref v) if v == "2.7.2-RELEASE"));
        assert!(s.backend().is_ok());
    }

    #[test]
    fn unknown_key_rejected() {
        let err = Settings::from_toml_str("stat_dir = \"/tmp\"").unwrap_err();
        assert!(err.contains("stat_dir"), "{err}");
    }

    #[test]
    fn version_file_used_without_fixed_version() {
        let s = Settings::default();
        assert!(matches!(s.platform(), HostPlatform::VersionFile(ref p) if p == Path::new("/etc/version")));
    }

    #[test]
    fn blank_reload_command_rejected() {
        let s = Settings {
            reload_command: Some("   ".to_owned()),
            ..Settings::default()
        };
        assert!(s.backend().is_err());
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.starts_with("settings error:"));
    }

    #[test]
    fn unsupported_registry_scheme_rejected() {
        let s = Settings {
            registry_url: "ftp://mirror.example/releases".to_owned(),
            ..Settings::default()
        };
        assert!(s.engine().is_err());
    }
}
