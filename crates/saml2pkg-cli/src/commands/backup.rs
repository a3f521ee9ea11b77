use super::{json_pretty, report_error, Step, EXIT_FAILURE, EXIT_SUCCESS};
use saml2pkg_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let step = Step::start("Backing up SAML2 configuration", json);
    let ok = match engine.backup() {
        Ok(ok) => ok,
        Err(e) => return report_error(step, "backup", &e, json),
    };

    if ok {
        step.done();
    } else {
        step.failed(None);
    }
    if json {
        let payload = serde_json::json!({
            "command": "backup",
            "status": if ok { "done" } else { "failed" },
            "path": engine.layout().backup_file(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(if ok { EXIT_SUCCESS } else { EXIT_FAILURE })
}
