use super::{json_pretty, report_error, Step, EXIT_SUCCESS};
use saml2pkg_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let step = Step::start("Refreshing package releases cache", json);
    let catalog = match engine.refresh_cache() {
        Ok(c) => c,
        Err(e) => return report_error(step, "refreshcache", &e, json),
    };
    step.done();

    if json {
        let versions: Vec<String> = catalog
            .releases
            .iter()
            .map(|r| r.version.to_string())
            .collect();
        let payload = serde_json::json!({
            "command": "refreshcache",
            "status": "done",
            "fetched_at": catalog.fetched_at,
            "releases": versions,
        });
        println!("{}", json_pretty(&payload)?);
    } else if catalog.releases.is_empty() {
        eprintln!("note: the registry lists no releases for this host");
    }
    Ok(EXIT_SUCCESS)
}
