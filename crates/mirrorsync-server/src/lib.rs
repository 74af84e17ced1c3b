//! Webhook server, sync engine, state store.
//!
//! This crate turns push notifications into mirror writes:
//! - an axum webhook receiving calendar push notifications
//! - a per-pair [`MirrorEngine`] running gate, fetch, decide and apply
//! - a [`SyncStore`] persisting resume tokens and event mappings
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mirrorsync_server::{
//!     AppState, JsonFileStore, MirrorEngine, PairConfig, ServerConfig, SignalHandler, bind,
//!     router, serve,
//! };
//! # use mirrorsync_providers::{CalendarMutator, ChangeFeed};
//! # async fn run(feed: Arc<dyn ChangeFeed>, mutator: Arc<dyn CalendarMutator>)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::default();
//! let store = Arc::new(JsonFileStore::new("/var/lib/mirrorsync"));
//! let pair = PairConfig::new("work", "me@work.example", "me@home.example");
//! let engine = MirrorEngine::new(pair, feed, mutator, store, &config);
//!
//! let signals = SignalHandler::new();
//! signals.spawn_listener();
//!
//! let listener = bind(config.bind_addr).await?;
//! serve(listener, router(AppState::new([Arc::new(engine)])), &signals).await?;
//! # Ok(())
//! # }
//! ```

mod applier;
mod config;
mod engine;
mod error;
mod feed;
mod gate;
mod retry;
mod signals;
mod store;
mod webhook;

pub use applier::{Applied, AppliedKind, ApplyError, MirrorApplier};
pub use config::{MAX_BATCH_TIMEOUT, PairConfig, ServerConfig};
pub use engine::{BatchReport, EngineError, EventFailure, MirrorEngine, NotificationOutcome};
pub use error::{ServerError, ServerResult};
pub use feed::{FeedBatch, FeedClient, FeedError};
pub use gate::{GateError, GateOutcome, NotificationGate, NotificationRequest, ResourceState};
pub use retry::RetryPolicy;
pub use signals::{ShutdownPhase, ShutdownSignal, SignalHandler};
pub use store::{
    BatchCommit, JsonFileStore, MappingDelta, MemoryStore, PairSnapshot, StoreError, SyncState,
    SyncStore,
};
pub use webhook::{
    AppState, CHANNEL_ID_HEADER, RESOURCE_ID_HEADER, RESOURCE_STATE_HEADER, bind, router, serve,
};
