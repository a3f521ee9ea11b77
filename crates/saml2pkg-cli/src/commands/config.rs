use super::{json_pretty, report_error, Step, EXIT_SUCCESS};
use saml2pkg_core::{CoreError, Engine};
use saml2pkg_schema::Saml2Config;
use std::path::Path;

/// Print the live configuration. Certificate and custom configuration stay
/// base64-encoded, as stored.
pub fn show(engine: &Engine) -> Result<u8, String> {
    let config = engine.load_config().map_err(|e| e.to_string())?;
    println!("{}", json_pretty(&config)?);
    Ok(EXIT_SUCCESS)
}

/// Validate a configuration document and make it the live configuration.
pub fn apply(engine: &Engine, file: &Path, json: bool) -> Result<u8, String> {
    let step = Step::start("Applying SAML2 configuration", json);
    let candidate = match std::fs::read(file)
        .map_err(|e| {
            let context = format!("{}: {e}", file.display());
            CoreError::Io(std::io::Error::new(e.kind(), context))
        })
        .and_then(|content| Saml2Config::from_json_slice(&content).map_err(CoreError::from))
    {
        Ok(c) => c,
        Err(e) => return report_error(step, "config apply", &e, json),
    };
    if let Err(e) = engine.save_config(&candidate) {
        return report_error(step, "config apply", &e, json);
    }
    step.done();

    if json {
        let payload = serde_json::json!({
            "command": "config apply",
            "status": "done",
            "sp_entity_id": candidate.sp_entity_id(),
            "sp_acs_url": candidate.sp_acs_url(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
