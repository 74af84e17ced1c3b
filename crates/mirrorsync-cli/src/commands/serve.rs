//! Serve command: runs the webhook server in the foreground.
//!
//! Per configured pair this builds two Google clients (one reading the
//! source calendar, one writing the target), a [`MirrorEngine`] over them,
//! and mounts all engines on one router.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use mirrorsync_providers::TokenFile;
use mirrorsync_providers::google::{GoogleCalendarClient, GoogleConfig};
use mirrorsync_server::{
    AppState, JsonFileStore, MemoryStore, MirrorEngine, ServerConfig, SignalHandler, SyncStore,
    bind, router, serve,
};

use crate::config::{AppConfig, PairSettings};
use crate::error::CliResult;

/// Starts the webhook server and blocks until SIGINT/SIGTERM.
pub async fn run(config: &AppConfig, bind_override: Option<SocketAddr>, ephemeral: bool) -> CliResult<()> {
    config.validate()?;

    let mut server_config = config.server.to_server_config();
    if let Some(addr) = bind_override {
        server_config.bind_addr = addr;
    }

    let store: Arc<dyn SyncStore> = if ephemeral {
        info!("Keeping sync state in memory only");
        Arc::new(MemoryStore::new())
    } else {
        let dir = config.state.resolved_dir();
        info!(dir = %dir.display(), "Using state directory");
        Arc::new(JsonFileStore::new(dir))
    };

    let engines = config
        .pairs
        .iter()
        .map(|pair| build_engine(pair, store.clone(), &server_config))
        .collect::<CliResult<Vec<_>>>()?;

    for engine in &engines {
        let pair = engine.pair();
        info!(
            pair = %pair.name,
            source = %pair.source_calendar_id,
            target = %pair.target_calendar_id,
            "Pair registered"
        );
    }

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let listener = bind(server_config.bind_addr).await?;
    info!(addr = %server_config.bind_addr, "Webhook listening");

    serve(listener, router(AppState::new(engines)), &signal_handler).await?;

    info!("Server stopped");
    Ok(())
}

fn build_engine(
    pair: &PairSettings,
    store: Arc<dyn SyncStore>,
    server_config: &ServerConfig,
) -> CliResult<Arc<MirrorEngine>> {
    let source_token = pair.source_token()?;
    let target_token = pair.target_token()?;

    // The target account's attendee response is read off source events.
    let feed = GoogleCalendarClient::new(
        Arc::new(TokenFile::new(source_token)),
        GoogleConfig::new().with_counterpart(pair.target_calendar_id.clone()),
    )?;
    let mutator = GoogleCalendarClient::new(
        Arc::new(TokenFile::new(target_token)),
        GoogleConfig::new(),
    )?;

    Ok(Arc::new(MirrorEngine::new(
        pair.to_pair_config(),
        Arc::new(feed),
        Arc::new(mutator),
        store,
        server_config,
    )))
}
