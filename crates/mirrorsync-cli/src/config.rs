//! Application configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/mirrorsync/config.toml` by default:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! public_url = "https://sync.example.com"
//!
//! [logging]
//! format = "json"
//!
//! [[pairs]]
//! name = "work"
//! source_calendar_id = "me@work.example"
//! target_calendar_id = "me@home.example"
//! prefix = "[WORK]"
//! source_token_path = "~/.local/share/mirrorsync/work-token.json"
//! same_account = false
//! target_token_path = "~/.local/share/mirrorsync/home-token.json"
//! ```
//!
//! Paths accept a leading `~`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mirrorsync_core::{MirrorPolicy, NO_COLOR_OVERRIDE, TracingOutputFormat};
use mirrorsync_server::{MAX_BATCH_TIMEOUT, PairConfig, RetryPolicy, ServerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

// ---------------------------------------------------------------------------
// AppConfig (config.toml)
// ---------------------------------------------------------------------------

/// Configuration for mirrorsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Webhook server settings.
    pub server: ServerSettings,

    /// Logging settings.
    pub logging: LoggingSettings,

    /// Sync state storage.
    pub state: StateSettings,

    /// Mirrored calendar pairs.
    pub pairs: Vec<PairSettings>,
}

/// Webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: SocketAddr,

    /// Public HTTPS base URL the calendar delivers notifications to.
    pub public_url: Option<String>,

    /// Hard limit for one batch, in seconds.
    pub batch_timeout_secs: u64,

    /// Notifications closer together than this are dropped, in milliseconds.
    pub debounce_ms: u64,

    /// Attempts per provider call, the first one included.
    pub max_attempts: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            bind: server.bind_addr,
            public_url: None,
            batch_timeout_secs: server.batch_timeout.as_secs(),
            debounce_ms: server.debounce_window.as_millis() as u64,
            max_attempts: server.retry.max_attempts,
        }
    }
}

impl ServerSettings {
    /// Converts to the server crate's configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind)
            .with_batch_timeout(Duration::from_secs(self.batch_timeout_secs))
            .with_debounce_window(Duration::from_millis(self.debounce_ms))
            .with_retry(RetryPolicy::default().with_max_attempts(self.max_attempts))
    }

    /// Returns the webhook URL of a pair, if a public URL is configured.
    pub fn notification_url(&self, pair: &str) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/notifications/{}", base.trim_end_matches('/'), pair))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Output format: `pretty`, `compact` or `json`.
    pub format: TracingOutputFormat,
}

/// Sync state storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Directory holding one JSON state file per source calendar.
    pub dir: PathBuf,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            dir: AppConfig::default_data_dir().join("state"),
        }
    }
}

impl StateSettings {
    /// Returns the state directory with `~` expanded.
    pub fn resolved_dir(&self) -> PathBuf {
        expand_tilde(&self.dir)
    }
}

/// One source calendar mirrored into one target calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSettings {
    /// Name used in the webhook path and on the command line.
    pub name: String,

    /// Calendar events are read from.
    pub source_calendar_id: String,

    /// Calendar mirrors are written to.
    pub target_calendar_id: String,

    /// Prefix added to mirrored titles.
    #[serde(default)]
    pub prefix: String,

    /// Text appended to mirrored descriptions.
    #[serde(default)]
    pub suffix: String,

    /// Color of mirrors; `"0"` keeps the target calendar default.
    #[serde(default = "default_color_id")]
    pub color_id: String,

    /// Both calendars are reachable with the source account's token.
    #[serde(default)]
    pub same_account: bool,

    /// Access token file for the source account.
    pub source_token_path: Option<PathBuf>,

    /// Access token file for the target account.
    pub target_token_path: Option<PathBuf>,
}

fn default_color_id() -> String {
    NO_COLOR_OVERRIDE.to_string()
}

impl PairSettings {
    /// Builds the mirror policy.
    pub fn policy(&self) -> MirrorPolicy {
        MirrorPolicy::new()
            .with_prefix(self.prefix.clone())
            .with_suffix(self.suffix.clone())
            .with_color_id(self.color_id.clone())
    }

    /// Converts to the server crate's pair configuration.
    pub fn to_pair_config(&self) -> PairConfig {
        PairConfig::new(
            self.name.clone(),
            self.source_calendar_id.clone(),
            self.target_calendar_id.clone(),
        )
        .with_policy(self.policy())
    }

    /// Returns the source token file with `~` expanded.
    pub fn source_token(&self) -> CliResult<PathBuf> {
        self.source_token_path
            .as_deref()
            .map(expand_tilde)
            .ok_or_else(|| {
                CliError::config(format!("pair {:?}: source_token_path is not set", self.name))
            })
    }

    /// Returns the target token file; the source one in same-account mode.
    pub fn target_token(&self) -> CliResult<PathBuf> {
        if self.same_account {
            return self.source_token();
        }
        self.target_token_path
            .as_deref()
            .map(expand_tilde)
            .ok_or_else(|| {
                CliError::config(format!(
                    "pair {:?}: target_token_path is not set (or set same_account = true)",
                    self.name
                ))
            })
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let name = &self.name;

        if name.trim().is_empty() {
            problems.push("pair name must not be empty".to_string());
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            problems.push(format!(
                "pair {name:?}: name may only contain letters, digits, '-' and '_'"
            ));
        }
        for (field, id) in [
            ("source_calendar_id", &self.source_calendar_id),
            ("target_calendar_id", &self.target_calendar_id),
        ] {
            if !is_calendar_id(id) {
                problems.push(format!(
                    "pair {name:?}: {field} {id:?} is not an email address or \"primary\""
                ));
            }
        }
        if self.source_calendar_id == self.target_calendar_id {
            problems.push(format!(
                "pair {name:?}: source and target calendars must differ"
            ));
        }
        if let Err(e) = self.source_token() {
            problems.push(e.to_string());
        }
        if !self.same_account {
            if let Err(e) = self.target_token() {
                problems.push(e.to_string());
            }
        }
        problems
    }
}

fn is_calendar_id(id: &str) -> bool {
    if id == "primary" {
        return true;
    }
    match id.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl AppConfig {
    /// Loads configuration from the default path, or defaults if it does not exist.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content).map_err(|e| CliError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mirrorsync")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mirrorsync")
    }

    /// Looks up a pair by name.
    pub fn pair(&self, name: &str) -> CliResult<&PairSettings> {
        self.pairs
            .iter()
            .find(|pair| pair.name == name)
            .ok_or_else(|| CliError::UnknownPair(name.to_string()))
    }

    /// Checks the configuration and reports every problem found.
    pub fn validate(&self) -> CliResult<()> {
        let mut problems = Vec::new();

        if self.pairs.is_empty() {
            problems.push("no [[pairs]] configured".to_string());
        }

        let mut names = HashSet::new();
        let mut sources = HashSet::new();
        for pair in &self.pairs {
            if !names.insert(pair.name.as_str()) {
                problems.push(format!("duplicate pair name {:?}", pair.name));
            }
            // State files are keyed by source calendar.
            if !sources.insert(pair.source_calendar_id.as_str()) {
                problems.push(format!(
                    "source calendar {:?} is used by more than one pair",
                    pair.source_calendar_id
                ));
            }
            problems.extend(pair.problems());
        }

        if let Some(ref public_url) = self.server.public_url {
            match url::Url::parse(public_url) {
                Ok(url) if url.scheme() == "https" => {}
                Ok(_) => problems.push(format!("server.public_url {public_url:?} must use https")),
                Err(e) => problems.push(format!("server.public_url {public_url:?}: {e}")),
            }
        }
        let max_timeout = MAX_BATCH_TIMEOUT.as_secs();
        if self.server.batch_timeout_secs == 0 || self.server.batch_timeout_secs > max_timeout {
            problems.push(format!(
                "server.batch_timeout_secs must be between 1 and {max_timeout}"
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CliError::Config(problems.join("; ")))
        }
    }
}
