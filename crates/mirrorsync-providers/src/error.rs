//! Error types for calendar provider operations.
//!
//! Every call through [`ChangeFeed`](crate::ChangeFeed) or
//! [`CalendarMutator`](crate::CalendarMutator) fails with a [`ProviderError`].
//! The server only looks at its [`ProviderErrorCode`]:
//!
//! | code                  | list (feed)          | insert/patch/delete       |
//! |-----------------------|----------------------|---------------------------|
//! | network, rate, server | retried              | retried                   |
//! | `InvalidSyncToken`    | full resync          | n/a                       |
//! | `NotFound`, `Gone`    | batch fails          | recreate / already done   |
//! | anything else         | batch fails          | event fails, batch goes on|

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Access token missing, unreadable or rejected (401).
    AuthenticationFailed,
    /// The account may not read or write this calendar (403).
    AuthorizationFailed,
    /// Connection, TLS or request timeout.
    NetworkError,
    /// Quota exhausted (429, or 403 with a rate-limit reason).
    RateLimited,
    /// 5xx from the calendar API.
    ServerError,
    /// A response body we could not make sense of.
    InvalidResponse,
    /// 404 on an event or calendar.
    NotFound,
    /// 410 on a single event.
    Gone,
    /// 410 on a listing: the sync token expired.
    InvalidSyncToken,
    /// 400 and other unexpected 4xx.
    BadRequest,
    /// Bad local setup, e.g. a token file that does not parse.
    ConfigurationError,
    /// Anything that should not happen.
    InternalError,
}

impl ProviderErrorCode {
    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError
        )
    }

    /// Returns true if the addressed event does not exist (any more).
    pub fn is_missing(self) -> bool {
        matches!(self, Self::NotFound | Self::Gone)
    }

    /// Stable snake_case name, used in logs and failure reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::Gone => "gone",
            Self::InvalidSyncToken => "invalid_sync_token",
            Self::BadRequest => "bad_request",
            Self::ConfigurationError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a calendar provider call.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// Which provider failed (e.g. "google").
    provider: Option<String>,
    /// Delay asked for by the server's `Retry-After` header.
    retry_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// One shorthand constructor per code.
macro_rules! code_constructors {
    ($($(#[$doc:meta])* $name:ident => $code:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(ProviderErrorCode::$code, message)
            }
        )*
    };
}

impl ProviderError {
    /// Creates an error with the given code and message.
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            retry_after: None,
            source: None,
        }
    }

    code_constructors! {
        /// Token missing, expired or rejected.
        authentication => AuthenticationFailed;
        /// Calendar access denied.
        authorization => AuthorizationFailed;
        /// Transport failure.
        network => NetworkError;
        /// Quota exhausted.
        rate_limited => RateLimited;
        /// 5xx response.
        server => ServerError;
        /// Unparseable or incomplete response.
        invalid_response => InvalidResponse;
        /// Event or calendar not found.
        not_found => NotFound;
        /// Event deleted.
        gone => Gone;
        /// Sync token expired.
        invalid_sync_token => InvalidSyncToken;
        /// Rejected request.
        bad_request => BadRequest;
        /// Local setup problem.
        configuration => ConfigurationError;
        /// Unexpected state.
        internal => InternalError;
    }

    /// Builder: tag the error with the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Builder: set the server-requested retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Builder: attach the underlying error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// See [`ProviderErrorCode::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// See [`ProviderErrorCode::is_missing`].
    pub fn is_missing(&self) -> bool {
        self.code.is_missing()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(ref provider) => write!(f, "{provider} {}: {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Result alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;
