//! mirrorsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use mirrorsync_cli::cli::{Cli, Command, ConfigAction, StateAction, StateArgs};
use mirrorsync_cli::commands;
use mirrorsync_cli::config::AppConfig;
use mirrorsync_cli::error::{CliError, CliResult};
use mirrorsync_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = if cli.config.is_some() {
        AppConfig::load_from(&config_path)?
    } else {
        AppConfig::load()?
    };

    // Initialize tracing
    let tracing = if is_server(&cli.command) {
        TracingConfig::server()
    } else {
        TracingConfig::default()
    };
    init_tracing(
        tracing
            .with_debug(cli.debug)
            .with_format(config.logging.format),
    )?;

    match cli.command {
        #[cfg(feature = "google")]
        Command::Serve { bind, ephemeral } => commands::serve::run(&config, bind, ephemeral).await,
        #[cfg(feature = "google")]
        Command::Watch { pair, ttl } => commands::watch::run(&config, &pair, ttl).await,
        Command::State(StateArgs { pair, action }) => match (action, pair) {
            (Some(StateAction::Show { pair }), _) | (None, Some(pair)) => {
                commands::state::show(&config, &pair)
            }
            (Some(StateAction::Reset { pair }), _) => commands::state::reset(&config, &pair),
            (None, None) => Err(CliError::config(
                "state needs a pair name: `mirrorsync state <pair>`",
            )),
        },
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        },
    }
}

#[cfg(feature = "google")]
fn is_server(command: &Command) -> bool {
    matches!(command, Command::Serve { .. })
}

#[cfg(not(feature = "google"))]
fn is_server(_command: &Command) -> bool {
    false
}
