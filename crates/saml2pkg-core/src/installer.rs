use crate::cache::ReleaseCache;
use crate::concurrency::{shutdown_requested, LifecycleLock};
use crate::lifecycle::validate_transition;
use crate::CoreError;
use saml2pkg_host::{HostError, PackageBackend, StagedPackage};
use saml2pkg_schema::{PkgVersion, Release};
use saml2pkg_store::{InstallJournal, InstallKind, InstallState, JournalEntry, RollbackStep, StoreLayout};
use serde::Serialize;
use std::fs;
use tracing::{debug, error, info, warn};

/// Result of an update or revert that did not fail.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstallOutcome {
    pub from: Option<String>,
    pub to: String,
    /// False when the target was already installed.
    pub changed: bool,
}

/// Journaled installer for package releases.
///
/// Every install runs `Pending → Downloading → Staging → Swapping →
/// Completed`, with each state and the matching undo step written to the
/// journal before the step runs. Nothing before `Swapping` touches the
/// active installation, so a failure there just discards the download and
/// staging directory. A failure at or after the swap reactivates the
/// previous version.
pub struct PackageInstaller {
    layout: StoreLayout,
    journal: InstallJournal,
    backend: Box<dyn PackageBackend>,
}

impl PackageInstaller {
    pub fn new(layout: &StoreLayout, backend: Box<dyn PackageBackend>) -> Self {
        Self {
            layout: layout.clone(),
            journal: InstallJournal::new(layout),
            backend,
        }
    }

    pub fn backend(&self) -> &dyn PackageBackend {
        self.backend.as_ref()
    }

    pub fn journal(&self) -> &InstallJournal {
        &self.journal
    }

    pub fn installed_version(&self) -> Result<Option<String>, CoreError> {
        Ok(self.backend.installed_version()?)
    }

    /// Number of journal entries left behind by interrupted runs.
    pub fn pending(&self) -> Result<usize, CoreError> {
        Ok(self.journal.list_incomplete()?.len())
    }

    /// Install the newest release this host supports. A no-op when the
    /// installed version is already at or past it.
    pub fn update(
        &self,
        lock: &LifecycleLock,
        cache: &ReleaseCache,
    ) -> Result<InstallOutcome, CoreError> {
        let latest = cache.latest_version()?.ok_or_else(|| {
            CoreError::Update("no release available for this host".to_owned())
        })?;
        let installed = self.installed_version()?;

        if let Some(ref current) = installed {
            match PkgVersion::parse(current) {
                Ok(v) if v >= latest => {
                    info!("{current} is already the latest release");
                    return Ok(InstallOutcome {
                        from: installed.clone(),
                        to: current.clone(),
                        changed: false,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("installed version '{current}' is unparseable ({e}), updating"),
            }
        }

        self.install(lock, cache, InstallKind::Update, &latest, installed)
    }

    /// Install exactly `target`, older or newer than what is installed.
    ///
    /// The version is parsed before anything else happens. Reverting to the
    /// installed version only re-verifies it.
    pub fn revert(
        &self,
        lock: &LifecycleLock,
        cache: &ReleaseCache,
        target: &str,
    ) -> Result<InstallOutcome, CoreError> {
        let target = PkgVersion::parse(target)?;
        let installed = self.installed_version()?;

        let already = installed
            .as_deref()
            .and_then(|v| PkgVersion::parse(v).ok())
            .is_some_and(|v| v == target);
        if already {
            self.backend.verify_installed(target.as_str())?;
            info!("{target} is already installed");
            return Ok(InstallOutcome {
                to: installed.clone().unwrap_or_else(|| target.to_string()),
                from: installed,
                changed: false,
            });
        }

        self.install(lock, cache, InstallKind::Revert, &target, installed)
    }

    fn install(
        &self,
        _lock: &LifecycleLock,
        cache: &ReleaseCache,
        kind: InstallKind,
        target: &PkgVersion,
        previous: Option<String>,
    ) -> Result<InstallOutcome, CoreError> {
        let release = cache.find_release(target)?.ok_or_else(|| {
            CoreError::Update(format!("version {target} is not available for this host"))
        })?;

        self.journal.initialize()?;
        let op_id = self
            .journal
            .begin(kind, previous.as_deref(), release.version.as_str())?;
        info!(
            "{kind}: {} -> {} (op_id={op_id})",
            previous.as_deref().unwrap_or("none"),
            release.version
        );

        let mut state = InstallState::Pending;
        let staged = match self.prepare(&op_id, &mut state, &release, cache, previous.as_deref()) {
            Ok(staged) => staged,
            Err(e) => return Err(self.abort(&op_id, &mut state, kind, target, e)),
        };

        let swapped = self
            .backend
            .activate(&staged)
            .and_then(|()| self.backend.reload())
            .and_then(|()| self.backend.verify_installed(release.version.as_str()));
        if let Err(e) = swapped {
            return Err(self.roll_back(&op_id, &mut state, kind, target, previous.as_deref(), &e));
        }

        self.advance(&op_id, &mut state, InstallState::Completed)?;
        self.settle(&op_id);
        info!("{kind} to {} complete", release.version);
        Ok(InstallOutcome {
            from: previous,
            to: release.version.to_string(),
            changed: true,
        })
    }

    /// Everything up to the swap: download, stage, verify, and record how to
    /// undo the swap.
    fn prepare(
        &self,
        op_id: &str,
        state: &mut InstallState,
        release: &Release,
        cache: &ReleaseCache,
        previous: Option<&str>,
    ) -> Result<StagedPackage, CoreError> {
        check_shutdown()?;
        self.advance(op_id, state, InstallState::Downloading)?;
        let downloads = self.layout.downloads_dir();
        fs::create_dir_all(&downloads)?;
        let artifact = downloads.join(format!("{op_id}.pkg"));
        self.journal
            .add_rollback_step(op_id, RollbackStep::RemoveFile(artifact.clone()))?;
        let size = cache.source().download(&release.artifact_url, &artifact)?;
        debug!("downloaded {} ({size} bytes)", release.artifact_url);

        check_shutdown()?;
        self.advance(op_id, state, InstallState::Staging)?;
        let staging = self.layout.staging_dir().join(op_id);
        self.journal
            .add_rollback_step(op_id, RollbackStep::RemoveDir(staging.clone()))?;
        let staged = self.backend.stage(&artifact, &staging)?;

        let ready = self
            .backend
            .verify_stage(&staged, release.version.as_str())
            .map_err(CoreError::from)
            .and_then(|()| check_shutdown())
            .and_then(|()| {
                let undo = match previous {
                    Some(v) => RollbackStep::Reactivate {
                        version: v.to_owned(),
                    },
                    None => RollbackStep::Deactivate,
                };
                self.journal
                    .add_rollback_step(op_id, undo)
                    .map_err(CoreError::from)
            })
            .and_then(|()| self.advance(op_id, state, InstallState::Swapping));
        if let Err(e) = ready {
            if let Err(de) = self.backend.discard_stage(&staged) {
                warn!("failed to discard staged package: {de}");
            }
            return Err(e);
        }
        Ok(staged)
    }

    fn advance(
        &self,
        op_id: &str,
        state: &mut InstallState,
        to: InstallState,
    ) -> Result<(), CoreError> {
        validate_transition(*state, to)?;
        self.journal.set_state(op_id, to)?;
        *state = to;
        Ok(())
    }

    /// Unwind an install that never reached the swap.
    fn abort(
        &self,
        op_id: &str,
        state: &mut InstallState,
        kind: InstallKind,
        target: &PkgVersion,
        cause: CoreError,
    ) -> CoreError {
        warn!("{kind} to {target} failed during {state}: {cause}");
        if let Err(e) = self.advance(op_id, state, InstallState::Failed) {
            warn!("journal {op_id}: {e}");
        }
        self.settle(op_id);
        match cause {
            CoreError::Interrupted => CoreError::Interrupted,
            other => CoreError::Update(format!(
                "{kind} to {target} failed: {other}; installed version unchanged"
            )),
        }
    }

    /// Put the previous version back after a failure at or past the swap.
    fn roll_back(
        &self,
        op_id: &str,
        state: &mut InstallState,
        kind: InstallKind,
        target: &PkgVersion,
        previous: Option<&str>,
        cause: &HostError,
    ) -> CoreError {
        warn!("{kind} to {target} failed after swap: {cause}; rolling back");
        if let Err(e) = self.advance(op_id, state, InstallState::Failed) {
            warn!("journal {op_id}: {e}");
        }

        match self.undo_swap(previous) {
            Ok(()) => {
                if let Err(e) = self.advance(op_id, state, InstallState::RolledBack) {
                    warn!("journal {op_id}: {e}");
                }
                self.settle(op_id);
                let restored = previous.unwrap_or("no installed version");
                info!("rolled back to {restored}");
                CoreError::Update(format!(
                    "{kind} to {target} failed: {cause}; rolled back to {restored}"
                ))
            }
            Err(e) => {
                error!("rollback after failed {kind} to {target} failed: {e}");
                CoreError::RollbackFailed(format!(
                    "{kind} to {target} failed: {cause}; rollback failed: {e}; \
                     journal entry {op_id} kept for recovery"
                ))
            }
        }
    }

    fn undo_swap(&self, previous: Option<&str>) -> Result<(), HostError> {
        match previous {
            Some(v) => self.backend.reactivate(v)?,
            None => self.backend.deactivate()?,
        }
        self.backend.reload()
    }

    /// Remove an entry's leftover files and the entry itself.
    fn settle(&self, op_id: &str) {
        match self.journal.read_entry(op_id) {
            Ok(entry) => self.journal.undo_filesystem_steps(&entry),
            Err(e) => warn!("journal {op_id}: {e}"),
        }
        if let Err(e) = self.journal.commit(op_id) {
            warn!("failed to commit journal entry {op_id}: {e}");
        }
    }

    /// Resolve installs interrupted by a crash or kill. Returns how many
    /// entries were resolved.
    ///
    /// Entries that never reached the swap only need their files removed.
    /// Entries at `Swapping`, or failed with a recorded undo step, get the
    /// previous version reactivated. If that fails the entry is kept and
    /// [`CoreError::RollbackFailed`] is returned.
    pub fn recover(&self, _lock: &LifecycleLock) -> Result<usize, CoreError> {
        let entries = self.journal.list_incomplete()?;
        let mut resolved = 0;
        for entry in &entries {
            info!(
                "recovering interrupted {} to {} (op_id={}, state={})",
                entry.kind, entry.target_version, entry.op_id, entry.state
            );
            if needs_undo(entry) {
                self.recover_swap(entry)?;
            }
            self.journal.undo_filesystem_steps(entry);
            self.journal.commit(&entry.op_id)?;
            resolved += 1;
        }
        if resolved > 0 {
            info!("recovered {resolved} interrupted install(s)");
        }
        Ok(resolved)
    }

    fn recover_swap(&self, entry: &JournalEntry) -> Result<(), CoreError> {
        let undo = entry.rollback_steps.iter().rev().find(|s| {
            matches!(s, RollbackStep::Reactivate { .. } | RollbackStep::Deactivate)
        });
        let result = match undo {
            Some(RollbackStep::Reactivate { version }) => self.undo_swap(Some(version)),
            Some(_) => self.undo_swap(None),
            None => Ok(()),
        };
        result.map_err(|e| {
            error!("recovery of {} failed: {e}", entry.op_id);
            CoreError::RollbackFailed(format!(
                "recovery of interrupted {} to {} failed: {e}; journal entry {} kept",
                entry.kind, entry.target_version, entry.op_id
            ))
        })
    }
}

fn needs_undo(entry: &JournalEntry) -> bool {
    match entry.state {
        InstallState::Swapping => true,
        InstallState::Failed => entry.rollback_steps.iter().any(|s| {
            matches!(s, RollbackStep::Reactivate { .. } | RollbackStep::Deactivate)
        }),
        _ => false,
    }
}

fn check_shutdown() -> Result<(), CoreError> {
    if shutdown_requested() {
        return Err(CoreError::Interrupted);
    }
    Ok(())
}
