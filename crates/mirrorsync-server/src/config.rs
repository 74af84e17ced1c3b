//! Server and pair configuration.

use std::net::SocketAddr;
use std::time::Duration;

use mirrorsync_core::MirrorPolicy;

use crate::retry::RetryPolicy;

/// Longest batch timeout the engine honours; longer ones are cut to this.
pub const MAX_BATCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the webhook listens on.
    pub bind_addr: SocketAddr,

    /// Hard limit for processing one notification, at most
    /// [`MAX_BATCH_TIMEOUT`].
    pub batch_timeout: Duration,

    /// Notifications closer together than this are acknowledged and dropped.
    pub debounce_window: Duration,

    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            batch_timeout: Duration::from_secs(60),
            debounce_window: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration listening on `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builder: set batch timeout, capped at [`MAX_BATCH_TIMEOUT`].
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout.min(MAX_BATCH_TIMEOUT);
        self
    }

    /// Builder: set debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Builder: set retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// One source calendar mirrored into one target calendar.
#[derive(Debug, Clone)]
pub struct PairConfig {
    /// Name used in the webhook path and in logs.
    pub name: String,
    /// Calendar events are read from.
    pub source_calendar_id: String,
    /// Calendar mirrors are written to.
    pub target_calendar_id: String,
    /// How mirrors are decorated.
    pub policy: MirrorPolicy,
}

impl PairConfig {
    /// Creates a pair with an undecorated mirror policy.
    pub fn new(
        name: impl Into<String>,
        source_calendar_id: impl Into<String>,
        target_calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_calendar_id: source_calendar_id.into(),
            target_calendar_id: target_calendar_id.into(),
            policy: MirrorPolicy::default(),
        }
    }

    /// Builder: set the mirror policy.
    pub fn with_policy(mut self, policy: MirrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}
