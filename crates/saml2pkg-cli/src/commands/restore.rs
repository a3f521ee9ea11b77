use super::{json_pretty, report_error, Step, EXIT_FAILURE, EXIT_SUCCESS};
use saml2pkg_core::{Engine, RestoreStatus};

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let step = Step::start("Restoring SAML2 configuration", json);
    let status = match engine.restore() {
        Ok(s) => s,
        Err(e) => return report_error(step, "restore", &e, json),
    };

    let (label, code) = match status {
        RestoreStatus::Success => {
            step.done();
            ("done", EXIT_SUCCESS)
        }
        RestoreStatus::NoBackup => {
            step.note("nothing to restore.");
            ("nothing to restore", EXIT_SUCCESS)
        }
        RestoreStatus::Failure => {
            step.failed(None);
            ("failed", EXIT_FAILURE)
        }
    };
    if json {
        let payload = serde_json::json!({
            "command": "restore",
            "status": label,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(code)
}
