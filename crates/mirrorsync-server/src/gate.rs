//! Admission control for push notifications.
//!
//! Every webhook delivery passes through [`NotificationGate::check`] before
//! any remote call is made. The checks run in a fixed order:
//!
//! 1. only `POST` is accepted
//! 2. the `sync` handshake sent right after channel registration is
//!    acknowledged without work
//! 3. anything other than `exists` / `not_exists` is rejected
//! 4. deliveries inside the debounce window are acknowledged as duplicates
//!
//! Only a delivery that passes all four records its timestamp and proceeds.

use std::fmt;
use std::time::Duration;

use axum::http::Method;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::SyncState;

/// Value of the `X-Goog-Resource-State` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Channel registration handshake.
    Sync,
    /// Something in the watched collection changed.
    Exists,
    /// The watched resource no longer exists.
    NotExists,
}

impl ResourceState {
    /// Parses a header value; unknown values yield `None`.
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "sync" => Some(Self::Sync),
            "exists" => Some(Self::Exists),
            "not_exists" => Some(Self::NotExists),
            _ => None,
        }
    }

    /// Returns the header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One webhook delivery, reduced to what the gate and the logs need.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    /// HTTP method.
    pub method: Method,
    /// Raw `X-Goog-Resource-State` header.
    pub resource_state: Option<String>,
    /// `X-Goog-Channel-ID` header.
    pub channel_id: Option<String>,
    /// `X-Goog-Resource-ID` header.
    pub resource_id: Option<String>,
    /// When the delivery arrived.
    pub received_at: DateTime<Utc>,
}

impl NotificationRequest {
    /// Creates a request received now.
    pub fn new(method: Method, resource_state: Option<String>) -> Self {
        Self {
            method,
            resource_state,
            channel_id: None,
            resource_id: None,
            received_at: Utc::now(),
        }
    }

    /// Creates a `POST` with the given resource state, received now.
    pub fn post(resource_state: &str) -> Self {
        Self::new(Method::POST, Some(resource_state.to_string()))
    }

    /// Builder: set channel and resource ids.
    pub fn with_channel(mut self, channel_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Builder: set the arrival time.
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }
}

/// Result of a delivery that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// `sync` handshake; answer 200 and do nothing.
    Acknowledged,
    /// Inside the debounce window; answer 208 and do nothing.
    AlreadyProcessed,
    /// Run a batch.
    Proceed,
}

/// A delivery rejected by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Not a `POST`.
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),
    /// Missing or unknown resource state.
    #[error("bad notification: {0}")]
    BadRequest(String),
}

/// Validates and debounces deliveries for one pair.
#[derive(Debug, Clone)]
pub struct NotificationGate {
    debounce: Duration,
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl NotificationGate {
    /// Creates a gate with the given debounce window.
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }

    /// Returns the debounce window.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Checks a delivery against the pair state.
    ///
    /// `state.last_notification_time` is updated only when the outcome is
    /// [`GateOutcome::Proceed`].
    pub fn check(
        &self,
        request: &NotificationRequest,
        state: &mut SyncState,
    ) -> Result<GateOutcome, GateError> {
        if request.method != Method::POST {
            return Err(GateError::MethodNotAllowed(request.method.clone()));
        }

        let resource_state = match request.resource_state.as_deref() {
            Some(value) => ResourceState::from_header(value).ok_or_else(|| {
                GateError::BadRequest(format!("unknown resource state {value:?}"))
            })?,
            None => {
                return Err(GateError::BadRequest("missing resource state".to_string()));
            }
        };

        if resource_state == ResourceState::Sync {
            return Ok(GateOutcome::Acknowledged);
        }

        if let Some(last) = state.last_notification_time {
            // Negative elapsed time (out-of-order delivery) fails to_std().
            let elapsed = request.received_at.signed_duration_since(last).to_std();
            if !elapsed.is_ok_and(|elapsed| elapsed >= self.debounce) {
                return Ok(GateOutcome::AlreadyProcessed);
            }
        }

        state.last_notification_time = Some(request.received_at);
        Ok(GateOutcome::Proceed)
    }
}
