//! Event classification.

use crate::event::ChangedEvent;

/// Broad category of a changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// An ordinary meeting or appointment; eligible for mirroring.
    Default,
    /// Birthdays, out-of-office blocks and other special kinds; never mirrored.
    Other,
}

/// Result of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Category of the event.
    pub category: Category,
    /// Both the source account and the counterpart have accepted or declined.
    pub both_attendees_resolved: bool,
}

/// Classifies a changed event.
///
/// `both_attendees_resolved` is false for events without attendees so that
/// cancellation of attendee-less events still reaches the decision table.
pub fn classify(event: &ChangedEvent) -> Classification {
    let category = if event.event_type.is_default() {
        Category::Default
    } else {
        Category::Other
    };

    let both_attendees_resolved = event.has_attendees
        && event.self_response.is_resolved()
        && event.counterpart_response.is_resolved();

    Classification {
        category,
        both_attendees_resolved,
    }
}
