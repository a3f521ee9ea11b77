mod commands;
mod settings;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_VALIDATION};
use saml2pkg_core::install_signal_handler;
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "pfsense-saml2",
    version,
    about = "Manage the pfSense SAML2 authentication package"
)]
struct Cli {
    /// Path to the settings TOML file (default: $PFSENSE_SAML2_SETTINGS,
    /// then /usr/local/etc/pfsense-saml2.toml).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Back up the SAML2 configuration.
    Backup,
    /// Restore the SAML2 configuration from the last backup.
    Restore,
    /// Refresh the cached list of package releases.
    Refreshcache,
    /// Update the package to the latest supported release.
    Update,
    /// Install a specific package version.
    Revert {
        /// Version to install, e.g. 0.2.1.
        version: String,
    },
    /// Print the installed package version.
    Version,
    /// Show installed and available versions.
    Status,
    /// Inspect or replace the SAML2 configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Manage the periodic release cache refresh.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the stored configuration as JSON.
    Show,
    /// Validate and store a configuration JSON file.
    Apply {
        /// Path to the configuration JSON file.
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ScheduleCommand {
    /// Install the cron entry that runs `refreshcache`.
    Enable,
    /// Remove the cron entry.
    Disable,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PFSENSE_SAML2_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let result = run(cli);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("settings error:") {
                EXIT_VALIDATION
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    let json = cli.json;

    let settings = match cli.command {
        Commands::Completions { shell } => return commands::completions::run::<Cli>(shell),
        Commands::Schedule { command } => {
            let settings = Settings::load(cli.settings.as_deref())?;
            return match command {
                ScheduleCommand::Enable => commands::schedule::enable(&settings, json),
                ScheduleCommand::Disable => commands::schedule::disable(&settings, json),
            };
        }
        _ => Settings::load(cli.settings.as_deref())?,
    };
    let engine = settings.engine()?;

    match cli.command {
        Commands::Backup => commands::backup::run(&engine, json),
        Commands::Restore => commands::restore::run(&engine, json),
        Commands::Refreshcache => commands::refreshcache::run(&engine, json),
        Commands::Update => commands::update::run(&engine, json),
        Commands::Revert { version } => commands::revert::run(&engine, &version, json),
        Commands::Version => commands::version::run(&engine, &settings.package_name, json),
        Commands::Status => commands::status::run(&engine, &settings.package_name, json),
        Commands::Config { command } => match command {
            ConfigCommand::Show => commands::config::show(&engine),
            ConfigCommand::Apply { file } => commands::config::apply(&engine, &file, json),
        },
        Commands::Schedule { .. } | Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
    }
}
