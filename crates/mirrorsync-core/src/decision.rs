//! Mirror decision table.
//!
//! [`decide`] is the single place where sync semantics live: given the
//! classification of a changed event and the current mapping for it, it
//! returns one [`MirrorAction`]. It performs no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::{Category, Classification};
use crate::event::{ChangedEvent, EventStatus};

/// A source event that currently has a mirror in the target calendar.
///
/// A mapping exists if and only if the mirror exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMapping {
    /// Event id in the source calendar.
    pub source_event_id: String,
    /// Event id of the mirror in the target calendar.
    pub target_event_id: String,
    /// Source status when the mirror was last written.
    pub last_applied_status: EventStatus,
}

impl EventMapping {
    /// Creates a new mapping.
    pub fn new(
        source_event_id: impl Into<String>,
        target_event_id: impl Into<String>,
        last_applied_status: EventStatus,
    ) -> Self {
        Self {
            source_event_id: source_event_id.into(),
            target_event_id: target_event_id.into(),
            last_applied_status,
        }
    }
}

/// Why an event was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a standard meeting (birthday, out-of-office, ...).
    NonDefaultType,
    /// Both sides already accepted or declined; nothing actionable changed.
    AttendeesSettled,
    /// Cancelled, but no mirror exists.
    NothingToDelete,
}

impl SkipReason {
    /// Returns a short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonDefaultType => "non_default_type",
            Self::AttendeesSettled => "attendees_settled",
            Self::NothingToDelete => "nothing_to_delete",
        }
    }
}

/// What to do with the mirror of one changed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorAction {
    /// Leave the target calendar alone.
    Skip(SkipReason),
    /// Create a new mirror.
    Create,
    /// Rewrite the existing mirror.
    Update {
        /// Id of the mirror in the target calendar.
        target_event_id: String,
    },
    /// Remove the existing mirror.
    Delete {
        /// Id of the mirror in the target calendar.
        target_event_id: String,
    },
}

impl MirrorAction {
    /// Returns a short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Skip(_) => "skip",
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Returns true for [`MirrorAction::Skip`].
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

impl fmt::Display for MirrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(reason) => write!(f, "skip ({})", reason.as_str()),
            Self::Create => f.write_str("create"),
            Self::Update { target_event_id } => write!(f, "update {}", target_event_id),
            Self::Delete { target_event_id } => write!(f, "delete {}", target_event_id),
        }
    }
}

/// A decision together with the event it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDecision {
    /// The action to take.
    pub action: MirrorAction,
    /// The changed event.
    pub event: ChangedEvent,
}

/// Decides what to do with the mirror of `event`.
///
/// Rules, in order:
/// 1. non-default event types are skipped;
/// 2. events where both attendees already answered are skipped;
/// 3. otherwise the outcome depends on whether a mirror exists and whether
///    the event is cancelled (cancelled status, or declined by the source
///    account):
///
/// | mapping | cancelled | action |
/// |---------|-----------|--------|
/// | no      | no        | Create |
/// | yes     | yes       | Delete |
/// | yes     | no        | Update |
/// | no      | yes       | Skip   |
pub fn decide(
    classification: &Classification,
    event: ChangedEvent,
    mapping: Option<&EventMapping>,
) -> MirrorDecision {
    let action = if classification.category == Category::Other {
        MirrorAction::Skip(SkipReason::NonDefaultType)
    } else if classification.both_attendees_resolved {
        MirrorAction::Skip(SkipReason::AttendeesSettled)
    } else {
        match (mapping, event.is_cancellation()) {
            (None, false) => MirrorAction::Create,
            (Some(m), true) => MirrorAction::Delete {
                target_event_id: m.target_event_id.clone(),
            },
            (Some(m), false) => MirrorAction::Update {
                target_event_id: m.target_event_id.clone(),
            },
            (None, true) => MirrorAction::Skip(SkipReason::NothingToDelete),
        }
    };

    MirrorDecision { action, event }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::event::{EventType, ResponseStatus};

    fn mapping() -> EventMapping {
        EventMapping::new("E1", "T1", EventStatus::Confirmed)
    }

    fn run(event: ChangedEvent, mapping: Option<&EventMapping>) -> MirrorAction {
        let classification = classify(&event);
        decide(&classification, event, mapping).action
    }

    /// Every combination of event type, status, responses and mapping presence.
    #[test]
    fn decision_table_is_exhaustive() {
        use ResponseStatus::*;
        let types = [EventType::Default, EventType::from_name("outOfOffice")];
        let statuses = [
            EventStatus::Confirmed,
            EventStatus::Tentative,
            EventStatus::Cancelled,
        ];
        let responses = [Accepted, Declined, Tentative, NeedsAction, Unknown];
        let existing = mapping();

        for event_type in &types {
            for status in statuses {
                for attendees in [false, true] {
                    for own in responses {
                        for counterpart in responses {
                            for mapped in [None, Some(&existing)] {
                                let mut event = ChangedEvent::new("E1")
                                    .with_type(event_type.clone())
                                    .with_status(status);
                                if attendees {
                                    event = event.with_responses(own, counterpart);
                                } else if own != Unknown || counterpart != Unknown {
                                    continue;
                                }

                                let resolved =
                                    attendees && own.is_resolved() && counterpart.is_resolved();
                                let cancelled = status == EventStatus::Cancelled || own == Declined;
                                let expected = if !event_type.is_default() {
                                    MirrorAction::Skip(SkipReason::NonDefaultType)
                                } else if resolved {
                                    MirrorAction::Skip(SkipReason::AttendeesSettled)
                                } else {
                                    match (mapped.is_some(), cancelled) {
                                        (false, false) => MirrorAction::Create,
                                        (true, true) => MirrorAction::Delete {
                                            target_event_id: "T1".into(),
                                        },
                                        (true, false) => MirrorAction::Update {
                                            target_event_id: "T1".into(),
                                        },
                                        (false, true) => {
                                            MirrorAction::Skip(SkipReason::NothingToDelete)
                                        }
                                    }
                                };

                                assert_eq!(
                                    run(event, mapped),
                                    expected,
                                    "type={event_type} status={status} attendees={attendees} \
                                     own={own:?} counterpart={counterpart:?} mapped={}",
                                    mapped.is_some()
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn other_type_always_skipped() {
        let existing = mapping();
        for status in [EventStatus::Confirmed, EventStatus::Cancelled] {
            for mapped in [None, Some(&existing)] {
                let event = ChangedEvent::new("E1")
                    .with_type(EventType::from_name("birthday"))
                    .with_status(status);
                assert_eq!(
                    run(event, mapped),
                    MirrorAction::Skip(SkipReason::NonDefaultType)
                );
            }
        }
    }

    #[test]
    fn settled_attendees_skip_even_when_cancelled() {
        let event = ChangedEvent::new("E1")
            .with_status(EventStatus::Cancelled)
            .with_responses(ResponseStatus::Accepted, ResponseStatus::Accepted);
        assert_eq!(
            run(event, Some(&mapping())),
            MirrorAction::Skip(SkipReason::AttendeesSettled)
        );
    }

    #[test]
    fn create_then_update_converges() {
        let event = ChangedEvent::new("E1")
            .with_responses(ResponseStatus::Accepted, ResponseStatus::NeedsAction);
        assert_eq!(run(event.clone(), None), MirrorAction::Create);

        let created = EventMapping::new("E1", "T9", event.status);
        assert_eq!(
            run(event, Some(&created)),
            MirrorAction::Update {
                target_event_id: "T9".into()
            }
        );
    }

    #[test]
    fn delete_then_skip_converges() {
        let event = ChangedEvent::new("E1").with_status(EventStatus::Cancelled);
        assert_eq!(
            run(event.clone(), Some(&mapping())),
            MirrorAction::Delete {
                target_event_id: "T1".into()
            }
        );
        assert_eq!(
            run(event, None),
            MirrorAction::Skip(SkipReason::NothingToDelete)
        );
    }

    #[test]
    fn decline_by_source_account_deletes() {
        let event = ChangedEvent::new("E1")
            .with_responses(ResponseStatus::Declined, ResponseStatus::NeedsAction);
        assert_eq!(
            run(event, Some(&mapping())),
            MirrorAction::Delete {
                target_event_id: "T1".into()
            }
        );
    }

    #[test]
    fn decision_keeps_event() {
        let event = ChangedEvent::new("E1").with_summary("Standup");
        let decision = decide(&classify(&event), event.clone(), None);
        assert_eq!(decision.event, event);
        assert_eq!(decision.action.name(), "create");
        assert!(!decision.action.is_skip());
    }
}
