//! Changed event types.
//!
//! A [`ChangedEvent`] is one item of a change feed batch, reduced to the
//! fields the mirroring pipeline looks at. It is never persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::EventTime;

/// The kind of calendar entry.
///
/// Only [`EventType::Default`] entries are ordinary meetings and appointments;
/// everything else (birthdays, out-of-office blocks, working location, focus
/// time, Gmail-generated entries) is carried as [`EventType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum EventType {
    /// A standard meeting or appointment.
    #[default]
    Default,
    /// Any other kind, with its wire name.
    Other(String),
}

impl EventType {
    /// Parses the wire name of an event type.
    ///
    /// An empty name is treated as the default type, since calendars omit
    /// the field for ordinary events.
    pub fn from_name(name: &str) -> Self {
        match name {
            "" | "default" => Self::Default,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire name of this event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Other(name) => name,
        }
    }

    /// Returns true for the standard meeting type.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an event in its calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The event is confirmed.
    #[default]
    Confirmed,
    /// The event is tentatively confirmed.
    Tentative,
    /// The event was cancelled or deleted.
    Cancelled,
}

impl EventStatus {
    /// Parses the wire name of a status. Unknown values map to `Confirmed`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "cancelled" => Self::Cancelled,
            "tentative" => Self::Tentative,
            _ => Self::Confirmed,
        }
    }

    /// Returns the wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Tentative => "tentative",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The response status of an attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The attendee has accepted the invitation.
    Accepted,
    /// The attendee has declined the invitation.
    Declined,
    /// The attendee has tentatively accepted.
    Tentative,
    /// The attendee has not responded.
    NeedsAction,
    /// The attendee is not on the event, or the status is unknown.
    #[default]
    Unknown,
}

impl ResponseStatus {
    /// Parses the wire name of a response status.
    pub fn from_name(name: &str) -> Self {
        match name {
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            "tentative" => Self::Tentative,
            "needsAction" => Self::NeedsAction,
            _ => Self::Unknown,
        }
    }

    /// Returns true if the attendee has made a final choice.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Accepted | Self::Declined)
    }
}

/// One changed event from a source calendar's change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedEvent {
    /// The event id in the source calendar.
    pub id: String,
    /// The kind of entry.
    pub event_type: EventType,
    /// Status in the source calendar.
    pub status: EventStatus,
    /// Response of the source calendar's own account.
    pub self_response: ResponseStatus,
    /// Response of the target calendar's account.
    pub counterpart_response: ResponseStatus,
    /// Whether the event has any attendees at all.
    pub has_attendees: bool,
    /// Event title.
    pub summary: Option<String>,
    /// Event description.
    pub description: Option<String>,
    /// Event location.
    pub location: Option<String>,
    /// Start time. Deleted-event stubs carry none.
    pub start: Option<EventTime>,
    /// End time. Deleted-event stubs carry none.
    pub end: Option<EventTime>,
    /// RRULE/EXDATE lines for recurring series.
    pub recurrence: Vec<String>,
    /// Color id set on the source event.
    pub color_id: Option<String>,
}

impl ChangedEvent {
    /// Creates a confirmed default-type event with no attendees.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: EventType::Default,
            status: EventStatus::Confirmed,
            self_response: ResponseStatus::Unknown,
            counterpart_response: ResponseStatus::Unknown,
            has_attendees: false,
            summary: None,
            description: None,
            location: None,
            start: None,
            end: None,
            recurrence: Vec::new(),
            color_id: None,
        }
    }

    /// Builder method to set the event type.
    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder method to set both attendee responses.
    ///
    /// Also marks the event as having attendees.
    pub fn with_responses(mut self, own: ResponseStatus, counterpart: ResponseStatus) -> Self {
        self.self_response = own;
        self.counterpart_response = counterpart;
        self.has_attendees = true;
        self
    }

    /// Builder method to set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set start and end.
    pub fn with_times(mut self, start: EventTime, end: EventTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Returns true if this change means the mirror should go away.
    ///
    /// Either the source event was cancelled, or the source account declined.
    pub fn is_cancellation(&self) -> bool {
        self.status == EventStatus::Cancelled || self.self_response == ResponseStatus::Declined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_from_name() {
        assert_eq!(EventType::from_name("default"), EventType::Default);
        assert_eq!(EventType::from_name(""), EventType::Default);
        assert_eq!(
            EventType::from_name("outOfOffice"),
            EventType::Other("outOfOffice".to_string())
        );
        assert_eq!(EventType::from_name("birthday").as_str(), "birthday");
    }

    #[test]
    fn response_status_resolution() {
        assert!(ResponseStatus::Accepted.is_resolved());
        assert!(ResponseStatus::Declined.is_resolved());
        assert!(!ResponseStatus::Tentative.is_resolved());
        assert!(!ResponseStatus::NeedsAction.is_resolved());
        assert!(!ResponseStatus::Unknown.is_resolved());
        assert_eq!(ResponseStatus::from_name("needsAction"), ResponseStatus::NeedsAction);
    }

    #[test]
    fn cancellation_signal() {
        let event = ChangedEvent::new("e1");
        assert!(!event.is_cancellation());

        let cancelled = ChangedEvent::new("e1").with_status(EventStatus::Cancelled);
        assert!(cancelled.is_cancellation());

        let declined = ChangedEvent::new("e1")
            .with_responses(ResponseStatus::Declined, ResponseStatus::NeedsAction);
        assert!(declined.is_cancellation());
        assert!(declined.has_attendees);
    }

    #[test]
    fn status_serde_names() {
        let json = serde_json::to_string(&EventStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(EventStatus::from_name("tentative"), EventStatus::Tentative);
        assert_eq!(EventStatus::from_name("whatever"), EventStatus::Confirmed);
    }
}
