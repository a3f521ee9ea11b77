use super::{json_pretty, Step, EXIT_FAILURE, EXIT_SUCCESS, EXIT_VALIDATION};
use crate::settings::Settings;
use saml2pkg_host::{CronFileScheduler, CronJob, HostError, HostScheduler};
use std::fmt::Write as _;
use std::path::Path;

pub const REFRESH_JOB: &str = "refreshcache";

/// Cron entry that runs `refreshcache` with the same settings file.
pub fn refresh_job(settings: &Settings) -> Result<CronJob, String> {
    let exe = std::env::current_exe()
        .map_err(|e| format!("cannot locate the pfsense-saml2 executable: {e}"))?;
    let mut command = cron_quote(&exe)?;
    if let Some(ref source) = settings.source {
        let _ = write!(command, " --settings {}", cron_quote(source)?);
    }
    command.push_str(" refreshcache");
    Ok(CronJob {
        name: REFRESH_JOB.to_owned(),
        minute: settings.refresh_minute.clone(),
        hour: settings.refresh_hour.clone(),
        user: "root".to_owned(),
        command,
    })
}

/// Quote `path` for the shell cron hands the command to. Paths that cron
/// itself would rewrite (`%`) or that cannot be single-quoted are refused.
fn cron_quote(path: &Path) -> Result<String, String> {
    let text = path
        .to_str()
        .ok_or_else(|| format!("path {} is not valid UTF-8", path.display()))?;
    if text.contains(['%', '\'', '\n', '\r']) {
        return Err(format!("path '{text}' cannot be used in a cron entry"));
    }
    let plain = text.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '@' | ',')
    });
    if plain {
        Ok(text.to_owned())
    } else {
        Ok(format!("'{text}'"))
    }
}

pub fn enable(settings: &Settings, json: bool) -> Result<u8, String> {
    let job = refresh_job(settings)?;
    let schedule = format!("{} {}", job.minute, job.hour);
    change(
        settings,
        json,
        "Scheduling package releases cache refresh",
        "schedule enable",
        |s| {
            s.register(job)?;
            Ok(true)
        },
        Some(schedule),
    )
}

pub fn disable(settings: &Settings, json: bool) -> Result<u8, String> {
    change(
        settings,
        json,
        "Unscheduling package releases cache refresh",
        "schedule disable",
        |s| Ok(s.unregister(REFRESH_JOB)),
        None,
    )
}

fn change(
    settings: &Settings,
    json: bool,
    action: &str,
    command: &str,
    edit: impl FnOnce(&mut CronFileScheduler) -> Result<bool, HostError>,
    schedule: Option<String>,
) -> Result<u8, String> {
    let mut scheduler = settings.scheduler()?;
    let step = Step::start(action, json);
    let result = edit(&mut scheduler).and_then(|changed| {
        scheduler.apply()?;
        Ok(changed)
    });

    match result {
        Ok(changed) => {
            if changed {
                step.done();
            } else {
                step.note("not scheduled.");
            }
            if json {
                let payload = serde_json::json!({
                    "command": command,
                    "status": if changed { "done" } else { "not scheduled" },
                    "cron_file": settings.cron_file,
                    "schedule": schedule,
                });
                println!("{}", json_pretty(&payload)?);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            step.failed(Some(&e.to_string()));
            if json {
                let payload = serde_json::json!({
                    "command": command,
                    "status": "failed",
                    "error": e.to_string(),
                });
                println!("{}", json_pretty(&payload)?);
            }
            Ok(match e {
                HostError::Schedule(_) => EXIT_VALIDATION,
                _ => EXIT_FAILURE,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn refresh_job_carries_settings_path() {
        let settings = Settings {
            source: Some(PathBuf::from("/tmp/alt.toml")),
            refresh_hour: "3".to_owned(),
            ..Settings::default()
        };
        let job = refresh_job(&settings).unwrap();
        assert_eq!(job.name, "refreshcache");
        assert_eq!(job.hour, "3");
        assert!(job.command.ends_with(" --settings /tmp/alt.toml refreshcache"));
    }

    #[test]
    fn settings_path_with_space_is_quoted() {
        let settings = Settings {
            source: Some(PathBuf::from("/srv/pf sense/alt.toml")),
            ..Settings::default()
        };
        let job = refresh_job(&settings).unwrap();
        assert!(job
            .command
            .ends_with(" --settings '/srv/pf sense/alt.toml' refreshcache"));
    }

    #[test]
    fn unquotable_settings_path_is_refused() {
        for path in ["/srv/100%/alt.toml", "/srv/it's/alt.toml"] {
            let settings = Settings {
                source: Some(PathBuf::from(path)),
                ..Settings::default()
            };
            assert!(refresh_job(&settings).is_err(), "{path}");
        }
    }

    #[test]
    fn refresh_job_without_settings_file() {
        let job = refresh_job(&Settings::default()).unwrap();
        assert!(!job.command.contains("--settings"));
        assert!(job.command.ends_with(" refreshcache"));
    }
}
