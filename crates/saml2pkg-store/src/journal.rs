use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Progress of one install attempt.
///
/// Forward path: `Pending → Downloading → Staging → Swapping → Completed`.
/// Any non-terminal state may move to `Failed`; `Failed → RolledBack` once the
/// previous version has been reactivated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstallState {
    Pending,
    Downloading,
    Staging,
    Swapping,
    Completed,
    Failed,
    RolledBack,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Staging => "staging",
            Self::Swapping => "swapping",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstallKind {
    Update,
    Revert,
}

impl fmt::Display for InstallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => f.write_str("update"),
            Self::Revert => f.write_str("revert"),
        }
    }
}

/// A single step that undoes part of an install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RollbackStep {
    /// Remove a staging directory.
    RemoveDir(PathBuf),
    /// Remove a downloaded artifact.
    RemoveFile(PathBuf),
    /// Make `version` the active installation again.
    Reactivate { version: String },
    /// Remove the active installation (first install, nothing to go back to).
    Deactivate,
}

/// A journal entry describing an in-flight install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op_id: String,
    pub kind: InstallKind,
    pub from_version: Option<String>,
    pub target_version: String,
    pub state: InstallState,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead journal for package installs.
///
/// The installer records an entry before it touches anything, appends
/// rollback steps ahead of each side effect, advances the state as it goes
/// and removes the entry once the install either completes or is fully
/// unwound. Entries found on startup belong to an interrupted run.
pub struct InstallJournal {
    journal_dir: PathBuf,
}

impl InstallJournal {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            journal_dir: layout.journal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.journal_dir)?;
        Ok(())
    }

    /// Begin a new entry in state `Pending`. Returns the op_id.
    pub fn begin(
        &self,
        kind: InstallKind,
        from_version: Option<&str>,
        target_version: &str,
    ) -> Result<String, StoreError> {
        let op_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(target_version.as_bytes()).to_hex()[..8]
        );
        let entry = JournalEntry {
            op_id: op_id.clone(),
            kind,
            from_version: from_version.map(str::to_owned),
            target_version: target_version.to_owned(),
            state: InstallState::Pending,
            timestamp: chrono::Utc::now().to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("journal begin: {kind} to {target_version} (op_id={op_id})");
        Ok(op_id)
    }

    pub fn set_state(&self, op_id: &str, state: InstallState) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.state = state;
        self.write_entry(&entry)?;
        debug!("journal {op_id}: {state}");
        Ok(())
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)?;
        Ok(())
    }

    /// Remove an entry once its install is settled.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    /// All entries left behind by interrupted runs, oldest first.
    /// Corrupt entries are renamed to `<name>.json.corrupt` and skipped, so
    /// the record survives for manual inspection.
    pub fn list_incomplete(&self) -> Result<Vec<JournalEntry>, StoreError> {
        if !self.journal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.journal_dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<JournalEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("corrupt journal entry {}: {e}", path.display());
                        quarantine(&path);
                    }
                },
                Err(e) => {
                    warn!("unreadable journal entry {}: {e}", path.display());
                    quarantine(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    pub fn read_entry(&self, op_id: &str) -> Result<JournalEntry, StoreError> {
        let path = self.entry_path(op_id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::JournalEntryNotFound(op_id.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Execute the filesystem cleanup steps of an entry in reverse order.
    /// `Reactivate` and `Deactivate` steps are left to the caller, which owns
    /// the backend.
    pub fn undo_filesystem_steps(&self, entry: &JournalEntry) {
        for step in entry.rollback_steps.iter().rev() {
            match step {
                RollbackStep::RemoveDir(path) => {
                    if path.exists() {
                        if let Err(e) = fs::remove_dir_all(path) {
                            warn!("journal cleanup: failed to remove dir {}: {e}", path.display());
                        } else {
                            debug!("journal cleanup: removed dir {}", path.display());
                        }
                    }
                }
                RollbackStep::RemoveFile(path) => {
                    if path.exists() {
                        if let Err(e) = fs::remove_file(path) {
                            warn!(
                                "journal cleanup: failed to remove file {}: {e}",
                                path.display()
                            );
                        } else {
                            debug!("journal cleanup: removed file {}", path.display());
                        }
                    }
                }
                RollbackStep::Reactivate { .. } | RollbackStep::Deactivate => {}
            }
        }
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.journal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entry)?;
        write_atomic(&self.entry_path(&entry.op_id), content.as_bytes())
    }
}

fn quarantine(path: &Path) {
    let mut target = path.as_os_str().to_owned();
    target.push(".corrupt");
    if let Err(e) = fs::rename(path, &target) {
        warn!("failed to set aside {}: {e}", path.display());
    }
}
