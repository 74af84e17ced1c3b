//! CLI error types.

use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A pair name that is not configured.
    #[error("unknown pair {0:?}")]
    UnknownPair(String),

    /// Calendar provider error.
    #[error("provider error: {0}")]
    Provider(#[from] mirrorsync_providers::ProviderError),

    /// Webhook server error.
    #[error(transparent)]
    Server(#[from] mirrorsync_server::ServerError),

    /// Sync state error.
    #[error("state error: {0}")]
    Store(#[from] mirrorsync_server::StoreError),

    /// Logging setup error.
    #[error("logging setup failed: {0}")]
    Tracing(#[from] mirrorsync_core::TracingError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
