//! Time types for calendar events.
//!
//! [`EventTime`] represents an event start or end, which is either a specific
//! instant (optionally pinned to an IANA time zone, which recurring events
//! need) or an all-day date.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Represents the start or end of a calendar event.
///
/// The original offset is kept so the mirror carries exactly the same
/// wall-clock time as the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventTime {
    /// A specific instant.
    DateTime {
        /// The instant, with the offset reported by the calendar.
        at: DateTime<FixedOffset>,
        /// IANA time zone the event was scheduled in, if reported.
        time_zone: Option<String>,
    },
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates an `EventTime::DateTime` without a time zone name.
    pub fn at(at: DateTime<FixedOffset>) -> Self {
        Self::DateTime {
            at,
            time_zone: None,
        }
    }

    /// Creates an `EventTime::DateTime` from a UTC instant.
    pub fn from_utc(at: DateTime<Utc>) -> Self {
        Self::at(at.fixed_offset())
    }

    /// Creates an `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Builder: attach an IANA time zone name.
    ///
    /// Has no effect on all-day times.
    pub fn with_time_zone(self, zone: impl Into<String>) -> Self {
        match self {
            Self::DateTime { at, .. } => Self::DateTime {
                at,
                time_zone: Some(zone.into()),
            },
            other => other,
        }
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the time zone name, if any.
    pub fn time_zone(&self) -> Option<&str> {
        match self {
            Self::DateTime { time_zone, .. } => time_zone.as_deref(),
            Self::AllDay(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_day_has_no_time_zone() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let time = EventTime::from_date(date).with_time_zone("Europe/Paris");
        assert!(time.is_all_day());
        assert_eq!(time.time_zone(), None);
    }

    #[test]
    fn datetime_keeps_offset() {
        let at = DateTime::parse_from_rfc3339("2024-03-15T10:00:00+02:00").unwrap();
        let time = EventTime::at(at).with_time_zone("Europe/Paris");
        assert!(!time.is_all_day());
        assert_eq!(time.time_zone(), Some("Europe/Paris"));
        match time {
            EventTime::DateTime { at, .. } => assert_eq!(at.offset().local_minus_utc(), 7200),
            EventTime::AllDay(_) => panic!("expected datetime"),
        }
    }

    #[test]
    fn serde_tagged_representation() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let json = serde_json::to_value(EventTime::from_date(date)).unwrap();
        assert_eq!(json["type"], "all_day");
    }
}
