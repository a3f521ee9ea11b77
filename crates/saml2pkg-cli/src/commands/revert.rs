use super::{json_pretty, report_error, Step, EXIT_SUCCESS};
use saml2pkg_core::Engine;

pub fn run(engine: &Engine, version: &str, json: bool) -> Result<u8, String> {
    let step = Step::start(&format!("Reverting package to {version}"), json);
    let outcome = match engine.revert(version) {
        Ok(o) => o,
        Err(e) => return report_error(step, "revert", &e, json),
    };
    step.done();

    if json {
        let payload = serde_json::json!({
            "command": "revert",
            "status": "done",
            "outcome": outcome,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
