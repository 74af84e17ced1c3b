//! Executes mirror decisions against the target calendar.

use std::fmt;

use mirrorsync_core::{EventMapping, MirrorAction, MirrorBody, MirrorDecision, MirrorPolicy, SkipReason};
use mirrorsync_providers::{CalendarMutator, ProviderError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;
use crate::store::MappingDelta;

/// What the applier actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedKind {
    /// Nothing; the decision was a skip.
    Skipped(SkipReason),
    /// A new mirror was inserted.
    Created,
    /// The existing mirror was rewritten.
    Updated,
    /// The mirror had vanished from the target and was inserted again.
    Recreated,
    /// The mirror was deleted.
    Deleted,
    /// The mirror was already gone; the mapping was dropped.
    AlreadyGone,
}

impl AppliedKind {
    /// Returns a short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Recreated => "recreated",
            Self::Deleted => "deleted",
            Self::AlreadyGone => "already_gone",
        }
    }
}

impl fmt::Display for AppliedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one applied decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// What happened.
    pub kind: AppliedKind,
    /// Mapping change to commit; `None` for skips.
    pub delta: Option<MappingDelta>,
}

impl Applied {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            kind: AppliedKind::Skipped(reason),
            delta: None,
        }
    }
}

/// A decision that could not be applied.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Transient failure that outlasted the retry policy.
    #[error("{action} for event {event_id} failed after retries: {source}")]
    Transient {
        event_id: String,
        action: &'static str,
        #[source]
        source: ProviderError,
    },
    /// Failure retrying cannot fix.
    #[error("{action} for event {event_id} failed: {source}")]
    Permanent {
        event_id: String,
        action: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl ApplyError {
    fn new(event_id: &str, action: &'static str, source: ProviderError) -> Self {
        let event_id = event_id.to_string();
        if source.is_retryable() {
            Self::Transient {
                event_id,
                action,
                source,
            }
        } else {
            Self::Permanent {
                event_id,
                action,
                source,
            }
        }
    }

    /// Returns the source event id.
    pub fn event_id(&self) -> &str {
        match self {
            Self::Transient { event_id, .. } | Self::Permanent { event_id, .. } => event_id,
        }
    }

    /// Returns the underlying provider error.
    pub fn provider_error(&self) -> &ProviderError {
        match self {
            Self::Transient { source, .. } | Self::Permanent { source, .. } => source,
        }
    }
}

/// Writes mirrors of one pair into its target calendar.
#[derive(Debug, Clone)]
pub struct MirrorApplier<M> {
    mutator: M,
    target_calendar_id: String,
    policy: MirrorPolicy,
    retry: RetryPolicy,
}

impl<M: CalendarMutator> MirrorApplier<M> {
    /// Creates an applier writing into `target_calendar_id`.
    pub fn new(
        mutator: M,
        target_calendar_id: impl Into<String>,
        policy: MirrorPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mutator,
            target_calendar_id: target_calendar_id.into(),
            policy,
            retry,
        }
    }

    /// Returns the target calendar id.
    pub fn target_calendar_id(&self) -> &str {
        &self.target_calendar_id
    }

    /// Applies one decision.
    ///
    /// - `Create` inserts and upserts the new mapping
    /// - `Update` patches; a mirror missing from the target is inserted again
    /// - `Delete` deletes; a mirror already missing counts as deleted
    /// - `Skip` does no I/O
    pub async fn apply(&self, decision: &MirrorDecision) -> Result<Applied, ApplyError> {
        let event = &decision.event;
        let action = decision.action.name();

        let applied = match &decision.action {
            MirrorAction::Skip(reason) => {
                debug!(event_id = %event.id, reason = reason.as_str(), "skipping event");
                return Ok(Applied::skipped(*reason));
            }
            MirrorAction::Create => {
                let body = self.policy.render(event);
                let target_event_id = self
                    .insert(&body)
                    .await
                    .map_err(|e| ApplyError::new(&event.id, action, e))?;
                self.upserted(AppliedKind::Created, decision, target_event_id)
            }
            MirrorAction::Update { target_event_id } => {
                let body = self.policy.render(event);
                match self.patch(target_event_id, &body).await {
                    Ok(()) => self.upserted(AppliedKind::Updated, decision, target_event_id.clone()),
                    Err(err) if err.is_missing() => {
                        warn!(
                            event_id = %event.id,
                            target_event_id = %target_event_id,
                            "mirror missing from target, recreating"
                        );
                        let new_id = self
                            .insert(&body)
                            .await
                            .map_err(|e| ApplyError::new(&event.id, action, e))?;
                        self.upserted(AppliedKind::Recreated, decision, new_id)
                    }
                    Err(err) => return Err(ApplyError::new(&event.id, action, err)),
                }
            }
            MirrorAction::Delete { target_event_id } => {
                let kind = match self.delete(target_event_id).await {
                    Ok(()) => AppliedKind::Deleted,
                    Err(err) if err.is_missing() => AppliedKind::AlreadyGone,
                    Err(err) => return Err(ApplyError::new(&event.id, action, err)),
                };
                Applied {
                    kind,
                    delta: Some(MappingDelta::Remove {
                        source_event_id: event.id.clone(),
                    }),
                }
            }
        };

        info!(
            event_id = %event.id,
            action,
            result = applied.kind.as_str(),
            "applied mirror change"
        );
        Ok(applied)
    }

    fn upserted(&self, kind: AppliedKind, decision: &MirrorDecision, target_event_id: String) -> Applied {
        let event = &decision.event;
        Applied {
            kind,
            delta: Some(MappingDelta::Upsert(EventMapping::new(
                event.id.clone(),
                target_event_id,
                event.status,
            ))),
        }
    }

    async fn insert(&self, body: &MirrorBody) -> Result<String, ProviderError> {
        self.retry
            .run("insert", || self.mutator.insert(&self.target_calendar_id, body))
            .await
    }

    async fn patch(&self, target_event_id: &str, body: &MirrorBody) -> Result<(), ProviderError> {
        self.retry
            .run("patch", || {
                self.mutator
                    .patch(&self.target_calendar_id, target_event_id, body)
            })
            .await
    }

    async fn delete(&self, target_event_id: &str) -> Result<(), ProviderError> {
        self.retry
            .run("delete", || {
                self.mutator.delete(&self.target_calendar_id, target_event_id)
            })
            .await
    }
}
