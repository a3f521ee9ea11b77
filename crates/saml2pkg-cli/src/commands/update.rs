use super::{json_pretty, report_error, Step, EXIT_SUCCESS};
use saml2pkg_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let step = Step::start("Updating package to latest version", json);
    let outcome = match engine.update() {
        Ok(o) => o,
        Err(e) => return report_error(step, "update", &e, json),
    };
    step.done();

    if json {
        let payload = serde_json::json!({
            "command": "update",
            "status": "done",
            "outcome": outcome,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
