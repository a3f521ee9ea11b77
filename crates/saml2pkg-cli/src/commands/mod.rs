pub mod backup;
pub mod completions;
pub mod config;
pub mod refreshcache;
pub mod restore;
pub mod revert;
pub mod schedule;
pub mod status;
pub mod update;
pub mod version;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use saml2pkg_core::{CoreError, ErrorKind};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION: u8 = 2;
pub const EXIT_LOCK_HELD: u8 = 3;
pub const EXIT_ROLLBACK_FAILED: u8 = 4;

pub fn exit_code(err: &CoreError) -> u8 {
    match err.kind() {
        ErrorKind::Validation => EXIT_VALIDATION,
        ErrorKind::LockHeld => EXIT_LOCK_HELD,
        ErrorKind::RollbackFailed => EXIT_ROLLBACK_FAILED,
        ErrorKind::System | ErrorKind::Update => EXIT_FAILURE,
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// One `<Action>...<outcome>` status line.
///
/// A spinner runs on stderr while the action is in progress; the finished
/// line goes to stdout so scripts can match on it. In JSON mode neither is
/// printed and the command emits its own document.
pub struct Step {
    action: String,
    pb: Option<ProgressBar>,
}

impl Step {
    pub fn start(action: &str, json: bool) -> Self {
        let pb = (!json).then(|| spinner(&format!("{action}...")));
        Self {
            action: action.to_owned(),
            pb,
        }
    }

    fn finish(self, outcome: &str, style: &Style) {
        if let Some(pb) = self.pb {
            pb.finish_and_clear();
            println!("{}...{}", self.action, style.apply_to(outcome));
        }
    }

    pub fn done(self) {
        self.finish("done.", &Style::new().green());
    }

    pub fn note(self, outcome: &str) {
        self.finish(outcome, &Style::new().yellow());
    }

    pub fn failed(self, reason: Option<&str>) {
        let outcome = match reason {
            Some(r) => format!("failed: {r}"),
            None => "failed.".to_owned(),
        };
        self.finish(&outcome, &Style::new().red().bold());
    }
}

/// Finish `step` with `err` and return the matching exit code.
pub fn report_error(step: Step, command: &str, err: &CoreError, json: bool) -> Result<u8, String> {
    step.failed(Some(&err.to_string()));
    if json {
        let payload = serde_json::json!({
            "command": command,
            "status": "failed",
            "kind": err.kind().to_string(),
            "error": err.to_string(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(exit_code(err))
}
