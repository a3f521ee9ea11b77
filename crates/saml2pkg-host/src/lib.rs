//! Host integration for pfsense-saml2.
//!
//! This crate is the boundary to the appliance itself: the pluggable
//! `PackageBackend` trait with a directory-based backend (tarball releases,
//! atomic `current` symlink swap) and an in-memory mock with failure
//! injection, `HostPlatform` for the host OS version, and `HostScheduler`
//! for registering the periodic cache refresh with cron.

pub mod backend;
pub mod directory;
pub mod mock;
pub mod platform;
pub mod scheduler;

pub use backend::{PackageBackend, PackageManifest, StagedPackage, MANIFEST_FILE};
pub use directory::DirectoryBackend;
pub use mock::{FailPoint, MockBackend};
pub use platform::HostPlatform;
pub use scheduler::{CronFileScheduler, CronJob, HostScheduler};

use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] saml2pkg_store::StoreError),
    #[error("invalid package archive: {0}")]
    Archive(String),
    #[error("staged package rejected: {0}")]
    InvalidStage(String),
    #[error("version {0} is not installed")]
    NotInstalled(String),
    #[error("cannot determine host platform version: {0}")]
    Platform(String),
    #[error("invalid schedule: {0}")]
    Schedule(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("injected failure at {0}")]
    Injected(String),
}

/// Split a configured command line into program and arguments.
pub fn parse_command(line: &str) -> Option<Vec<String>> {
    let argv: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
    if argv.is_empty() {
        None
    } else {
        Some(argv)
    }
}

pub(crate) fn run_command(argv: &[String]) -> Result<(), HostError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    debug!("running {}", argv.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| HostError::CommandFailed(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HostError::CommandFailed(format!(
            "{} exited with {}: {}",
            argv.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_splits_words() {
        assert_eq!(
            parse_command("/usr/local/sbin/pfSsh.php playback svc restart php-fpm"),
            Some(vec![
                "/usr/local/sbin/pfSsh.php".to_owned(),
                "playback".to_owned(),
                "svc".to_owned(),
                "restart".to_owned(),
                "php-fpm".to_owned(),
            ])
        );
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn run_command_reports_failure() {
        assert!(run_command(&["true".to_owned()]).is_ok());
        assert!(matches!(
            run_command(&["false".to_owned()]),
            Err(HostError::CommandFailed(_))
        ));
        assert!(matches!(
            run_command(&["/nonexistent/binary".to_owned()]),
            Err(HostError::CommandFailed(_))
        ));
    }
}
