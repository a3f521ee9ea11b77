use super::{json_pretty, EXIT_SUCCESS};
use console::Style;
use saml2pkg_core::Engine;

pub fn run(engine: &Engine, package_name: &str, json: bool) -> Result<u8, String> {
    let status = engine.status().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&status)?);
        return Ok(EXIT_SUCCESS);
    }

    let label = Style::new().bold();
    let none = || Style::new().dim().apply_to("-").to_string();

    println!(
        "{}  {}",
        label.apply_to("installed:"),
        status
            .installed
            .as_deref()
            .map_or_else(none, |v| format!("{package_name} {v}"))
    );
    let latest = match (status.latest.as_deref(), status.latest_date.as_deref()) {
        (Some(v), Some(d)) => format!("{v} ({d})"),
        (Some(v), None) => v.to_owned(),
        (None, _) => none(),
    };
    println!("{}     {latest}", label.apply_to("latest:"));
    if status.update_available {
        println!("             {}", Style::new().yellow().apply_to("update available"));
    }
    println!(
        "{}       {}",
        label.apply_to("host:"),
        status.host_version.as_deref().map_or_else(none, str::to_owned)
    );
    if !status.supported.is_empty() {
        println!(
            "{}  {}",
            label.apply_to("supported:"),
            status.supported.join(", ")
        );
    }
    println!(
        "{}      {}",
        label.apply_to("cache:"),
        status
            .cache_fetched_at
            .as_deref()
            .map_or_else(none, |t| format!("fetched {t}"))
    );
    println!(
        "{}     {}",
        label.apply_to("backup:"),
        status
            .backup_created_at
            .as_deref()
            .map_or_else(none, |t| format!("taken {t}"))
    );
    if status.pending_recovery > 0 {
        println!(
            "{}",
            Style::new().red().apply_to(format!(
                "{} interrupted install(s) will be recovered by the next lifecycle command",
                status.pending_recovery
            ))
        );
    }
    Ok(EXIT_SUCCESS)
}
