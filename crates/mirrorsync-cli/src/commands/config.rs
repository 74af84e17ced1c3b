//! Configuration commands.

use std::path::Path;

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &AppConfig, path: &Path) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CliError::config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &AppConfig) -> CliResult<()> {
    config.validate()?;

    for pair in &config.pairs {
        println!(
            "{}: {} -> {}",
            pair.name, pair.source_calendar_id, pair.target_calendar_id
        );
    }
    if config.server.public_url.is_none() {
        println!("note: server.public_url is not set; `mirrorsync watch` needs it.");
    }
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> CliResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
