//! HTTP surface: push notification webhook and health check.
//!
//! | Outcome                          | Status |
//! |----------------------------------|--------|
//! | `sync` handshake, batch done     | 200    |
//! | duplicate inside debounce window | 208    |
//! | missing/unknown resource state   | 400    |
//! | unknown pair                     | 404    |
//! | method other than `POST`         | 405    |
//! | listing or commit failed         | 500    |
//! | batch deadline passed            | 503    |
//!
//! Google redelivers on 5xx, which is what a failed batch wants.
//!
//! Each batch runs in its own task, so a client that hangs up mid-batch does
//! not cut the batch short.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::engine::{EngineError, MirrorEngine, NotificationOutcome};
use crate::error::{ServerError, ServerResult};
use crate::gate::{GateError, NotificationRequest};
use crate::signals::SignalHandler;

/// Header carrying the resource state (`sync`, `exists`, `not_exists`).
pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";
/// Header carrying the channel id chosen at registration.
pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
/// Header carrying the watched resource id.
pub const RESOURCE_ID_HEADER: &str = "x-goog-resource-id";

/// Shared router state: one engine per pair name.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    engines: Arc<HashMap<String, Arc<MirrorEngine>>>,
}

impl AppState {
    /// Creates state from a set of engines, keyed by their pair names.
    pub fn new(engines: impl IntoIterator<Item = Arc<MirrorEngine>>) -> Self {
        let engines = engines
            .into_iter()
            .map(|engine| (engine.name().to_string(), engine))
            .collect();
        Self {
            engines: Arc::new(engines),
        }
    }

    /// Looks up the engine of a pair.
    pub fn engine(&self, pair: &str) -> Option<&Arc<MirrorEngine>> {
        self.engines.get(pair)
    }

    /// Returns the configured pair names, sorted.
    pub fn pair_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/notifications/{pair}", any(notification))
        .with_state(state)
}

/// Binds the listen address.
pub async fn bind(addr: std::net::SocketAddr) -> ServerResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::bind(addr, e))
}

/// Serves `router` on `listener` until `signals` starts draining.
///
/// Returns once in-flight requests finish, or right away when the shutdown
/// is forced.
pub async fn serve(listener: TcpListener, router: Router, signals: &SignalHandler) -> ServerResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "webhook server listening");
    }
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(signals.shutdown().wait())
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = signals.forced().wait() => {
            warn!("abandoning in-flight notifications");
            return Ok(());
        }
    }
    info!("webhook server stopped");
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "pairs": state.pair_names() }))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn notification(
    State(state): State<AppState>,
    Path(pair): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(engine) = state.engine(&pair) else {
        warn!(pair = %pair, "notification for unknown pair");
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown pair" }))).into_response();
    };

    let request = NotificationRequest {
        method,
        resource_state: header(&headers, RESOURCE_STATE_HEADER),
        channel_id: header(&headers, CHANNEL_ID_HEADER),
        resource_id: header(&headers, RESOURCE_ID_HEADER),
        received_at: Utc::now(),
    };

    let engine = Arc::clone(engine);
    let batch = tokio::spawn(async move { engine.handle_notification(request).await });
    let result = match batch.await {
        Ok(result) => result,
        Err(err) => {
            error!(pair = %pair, error = %err, "notification task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "notification task failed" })),
            )
                .into_response();
        }
    };

    match result {
        Ok(NotificationOutcome::Acknowledged) => {
            (StatusCode::OK, Json(json!({ "status": "acknowledged" }))).into_response()
        }
        Ok(NotificationOutcome::AlreadyProcessed) => (
            StatusCode::ALREADY_REPORTED,
            Json(json!({ "status": "already_processed" })),
        )
            .into_response(),
        Ok(NotificationOutcome::ResyncScheduled) => {
            (StatusCode::OK, Json(json!({ "status": "resync_scheduled" }))).into_response()
        }
        Ok(NotificationOutcome::Processed(report)) => {
            (StatusCode::OK, Json(json!({ "status": "processed", "report": report }))).into_response()
        }
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::Gate(GateError::MethodNotAllowed(_)) => StatusCode::METHOD_NOT_ALLOWED,
        EngineError::Gate(GateError::BadRequest(_)) => StatusCode::BAD_REQUEST,
        EngineError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Load(_) | EngineError::Feed(_) | EngineError::Commit(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
