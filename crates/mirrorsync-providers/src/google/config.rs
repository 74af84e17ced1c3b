//! Google Calendar client configuration.

use std::time::Duration;

/// Base URL for Google Calendar API v3.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Who Google notifies about mirror writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendUpdates {
    /// Notify all guests.
    All,
    /// Notify only non-Google-Calendar guests.
    ExternalOnly,
    /// Notify nobody (mirrors are private copies).
    #[default]
    None,
}

impl SendUpdates {
    /// Returns the query parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ExternalOnly => "externalOnly",
            Self::None => "none",
        }
    }
}

/// Configuration for [`GoogleCalendarClient`](super::GoogleCalendarClient).
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// API base URL; overridable for tests and proxies.
    pub api_base: String,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Page size for change listings.
    pub page_size: u32,

    /// Notification policy for inserts and patches.
    pub send_updates: SendUpdates,

    /// Calendar id of the counterpart account, whose attendee response is
    /// reported as `counterpart_response`.
    pub counterpart_calendar_id: Option<String>,

    /// How far back a full resync reaches. `None` lists the whole calendar.
    pub full_sync_lookback: Option<chrono::Duration>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_base: CALENDAR_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            page_size: 250,
            send_updates: SendUpdates::None,
            counterpart_calendar_id: None,
            full_sync_lookback: Some(chrono::Duration::days(1)),
        }
    }
}

impl GoogleConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the API base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder method to set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder method to set the counterpart calendar id.
    pub fn with_counterpart(mut self, calendar_id: impl Into<String>) -> Self {
        self.counterpart_calendar_id = Some(calendar_id.into());
        self
    }

    /// Builder method to set the full resync lookback window.
    pub fn with_full_sync_lookback(mut self, lookback: Option<chrono::Duration>) -> Self {
        self.full_sync_lookback = lookback;
        self
    }

    /// Builder method to set the page size, clamped to the API maximum.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.clamp(1, 2500);
        self
    }
}
