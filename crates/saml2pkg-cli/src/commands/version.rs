use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use saml2pkg_core::Engine;

pub fn run(engine: &Engine, package_name: &str, json: bool) -> Result<u8, String> {
    let installed = engine.installed_version().map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "package": package_name,
            "version": installed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match installed {
            Some(ref v) => println!("{package_name} {v}"),
            None => println!("{package_name} not installed"),
        }
    }
    Ok(if installed.is_some() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
