//! Push notification channels.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a calendar pair a channel watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarRole {
    /// The calendar events are mirrored from.
    Source,
    /// The calendar mirrors are written to.
    Target,
}

impl fmt::Display for CalendarRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// A registered watch on a calendar's events.
///
/// The calendar sends a `sync` notification right after registration, then
/// `exists` notifications whenever events change, until `expiration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    /// Id chosen by us when registering.
    pub channel_id: String,
    /// Opaque id of the watched resource, chosen by the calendar.
    pub resource_id: String,
    /// Which calendar of the pair is watched.
    pub calendar_role: CalendarRole,
    /// When the calendar stops sending notifications.
    pub expiration: Option<DateTime<Utc>>,
}

impl NotificationChannel {
    /// Returns true if the channel has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|at| at <= now)
    }
}
