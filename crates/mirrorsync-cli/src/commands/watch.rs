//! Watch command: registers a push channel on a pair's source calendar.
//!
//! Channels expire (Google caps them at about a week), so this is meant to
//! be re-run periodically, e.g. from a systemd timer.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use mirrorsync_providers::google::{GoogleCalendarClient, GoogleConfig};
use mirrorsync_providers::{CalendarRole, TokenFile};

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Registers a channel and prints it as JSON.
pub async fn run(config: &AppConfig, pair: &str, ttl: Option<u64>) -> CliResult<()> {
    let pair = config.pair(pair)?;
    let address = config.server.notification_url(&pair.name).ok_or_else(|| {
        CliError::config("server.public_url must be set to register a notification channel")
    })?;
    config.validate()?;

    let client = GoogleCalendarClient::new(
        Arc::new(TokenFile::new(pair.source_token()?)),
        GoogleConfig::new(),
    )?;

    let channel_id = uuid::Uuid::new_v4().to_string();
    info!(pair = %pair.name, %channel_id, %address, "Registering notification channel");

    let channel = client
        .watch(
            &pair.source_calendar_id,
            &channel_id,
            &address,
            CalendarRole::Source,
            ttl.map(Duration::from_secs),
        )
        .await?;

    let json = serde_json::to_string_pretty(&channel)
        .map_err(|e| CliError::config(format!("failed to serialize channel: {}", e)))?;
    println!("{}", json);
    Ok(())
}
