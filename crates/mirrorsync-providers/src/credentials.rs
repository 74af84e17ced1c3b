//! Access token sources.
//!
//! Token acquisition and refresh happen outside mirrorsync (any OAuth tool
//! that writes a token file will do). This module only reads tokens: a
//! missing or expired token is an authentication error, which the engine
//! treats as fatal for the current batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Supplies a bearer token for API calls.
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    /// Returns a currently valid access token.
    fn access_token(&self) -> ProviderResult<String>;
}

/// A fixed token, mostly for tests and one-off commands.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Creates a static token provider.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> ProviderResult<String> {
        if self.0.is_empty() {
            return Err(ProviderError::authentication("empty access token"));
        }
        Ok(self.0.clone())
    }
}

/// Contents of a stored OAuth token file.
///
/// Accepts both our own field names and the ones written by Google's
/// client libraries (`token`, `expiry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// The access token for API requests.
    #[serde(alias = "token")]
    pub access_token: String,

    /// The refresh token, used by whatever tool refreshes the file.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// When the access token expires.
    #[serde(default, alias = "expiry")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The OAuth scopes that were granted.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenInfo {
    /// Returns true if the access token is expired at `now`.
    ///
    /// Tokens without an expiry are assumed valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Reads the access token from a JSON file.
///
/// The parsed token is cached and the file is read again only when its
/// modification time or size changes, so a token refreshed by an external
/// tool is picked up without a restart.
#[derive(Debug)]
pub struct TokenFile {
    path: PathBuf,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Debug)]
struct CachedToken {
    modified: SystemTime,
    len: u64,
    info: TokenInfo,
}

impl TokenFile {
    /// Creates a token file reader.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Returns the token file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, e: std::io::Error) -> ProviderError {
        ProviderError::authentication(format!(
            "failed to read token file {}: {}",
            self.path.display(),
            e
        ))
        .with_source(e)
    }

    /// Loads and parses the token file.
    pub fn load(&self) -> ProviderResult<TokenInfo> {
        let content = fs::read_to_string(&self.path).map_err(|e| self.read_error(e))?;

        let tokens: TokenInfo = serde_json::from_str(&content).map_err(|e| {
            ProviderError::configuration(format!(
                "failed to parse token file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), "loaded access token");
        Ok(tokens)
    }

    /// Returns the cached token, re-reading the file if it changed.
    fn current(&self) -> ProviderResult<TokenInfo> {
        let metadata = fs::metadata(&self.path).map_err(|e| self.read_error(e))?;
        let len = metadata.len();
        // Without modification times every call reads the file.
        let modified = metadata.modified().ok();

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = cached
            .as_ref()
            .filter(|entry| Some(entry.modified) == modified && entry.len == len);
        if let Some(entry) = fresh {
            return Ok(entry.info.clone());
        }

        let info = self.load()?;
        *cached = modified.map(|modified| CachedToken {
            modified,
            len,
            info: info.clone(),
        });
        Ok(info)
    }
}

impl CredentialProvider for TokenFile {
    fn access_token(&self) -> ProviderResult<String> {
        let tokens = self.current()?;
        if tokens.is_expired_at(Utc::now()) {
            return Err(ProviderError::authentication(format!(
                "access token in {} expired",
                self.path.display()
            )));
        }
        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn write_token(dir: &TempDir, json: &str) -> TokenFile {
        let path = dir.path().join("token.json");
        fs::write(&path, json).unwrap();
        TokenFile::new(path)
    }

    #[test]
    fn reads_valid_token() {
        let dir = TempDir::new().unwrap();
        let expires = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let file = write_token(
            &dir,
            &format!(r#"{{"access_token": "ya29.abc", "expires_at": "{expires}"}}"#),
        );
        assert_eq!(file.access_token().unwrap(), "ya29.abc");
    }

    #[test]
    fn accepts_google_library_field_names() {
        let dir = TempDir::new().unwrap();
        let file = write_token(
            &dir,
            r#"{"token": "ya29.lib", "refresh_token": "1//r", "scopes": ["https://www.googleapis.com/auth/calendar"]}"#,
        );
        let info = file.load().unwrap();
        assert_eq!(info.access_token, "ya29.lib");
        assert_eq!(info.refresh_token.as_deref(), Some("1//r"));
        assert!(info.expires_at.is_none());
        assert_eq!(file.access_token().unwrap(), "ya29.lib");
    }

    #[test]
    fn expired_token_is_auth_error() {
        let dir = TempDir::new().unwrap();
        let expires = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let file = write_token(
            &dir,
            &format!(r#"{{"access_token": "old", "expires_at": "{expires}"}}"#),
        );
        let err = file.access_token().unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ProviderErrorCode::AuthenticationFailed
        );
    }

    #[test]
    fn unchanged_file_is_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let file = write_token(&dir, r#"{"access_token": "ya29.abc"}"#);
        assert_eq!(file.access_token().unwrap(), "ya29.abc");

        // Same size, same modification time: the old token is still served.
        let modified = fs::metadata(file.path()).unwrap().modified().unwrap();
        fs::write(file.path(), r#"{"access_token": "ya29.xyz"}"#).unwrap();
        let handle = fs::File::options().write(true).open(file.path()).unwrap();
        handle.set_modified(modified).unwrap();
        assert_eq!(file.access_token().unwrap(), "ya29.abc");

        handle
            .set_modified(modified + std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(file.access_token().unwrap(), "ya29.xyz");
    }

    #[test]
    fn rewritten_file_is_read_again() {
        let dir = TempDir::new().unwrap();
        let file = write_token(&dir, r#"{"access_token": "first"}"#);
        assert_eq!(file.access_token().unwrap(), "first");

        fs::write(file.path(), r#"{"access_token": "refreshed-token"}"#).unwrap();
        assert_eq!(file.access_token().unwrap(), "refreshed-token");
    }

    #[test]
    fn missing_file_is_auth_error() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("absent.json"));
        let err = file.access_token().unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ProviderErrorCode::AuthenticationFailed
        );
    }

    #[test]
    fn static_token() {
        assert_eq!(StaticToken::new("t").access_token().unwrap(), "t");
        assert!(StaticToken::new("").access_token().is_err());
    }
}
