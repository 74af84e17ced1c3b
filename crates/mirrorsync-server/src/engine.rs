//! Per-pair sync engine.
//!
//! A [`MirrorEngine`] owns everything one calendar pair needs: the gate, the
//! feed client, the applier and a cached snapshot of the persisted state.
//! [`MirrorEngine::handle_notification`] runs one notification end to end:
//!
//! ```text
//! gate ─▶ fetch changes ─▶ for each event: classify ─▶ decide ─▶ apply ─▶ commit
//! ```
//!
//! Notifications for the same pair are serialised by an async mutex; the
//! gate, the batch and the commit all run under it. Different pairs have
//! independent engines.
//!
//! The cached snapshot is changed in place as mirrors are written. Mapping
//! changes that have not reached the store yet are kept next to it and go
//! out with the next commit, so neither a failed commit nor a dropped batch
//! loses track of a mirror that already exists on the target calendar.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use mirrorsync_core::{classify, decide};
use mirrorsync_providers::{CalendarMutator, ChangeFeed};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{Span, debug, error, info, warn};

use crate::applier::{AppliedKind, ApplyError, MirrorApplier};
use crate::config::{MAX_BATCH_TIMEOUT, PairConfig, ServerConfig};
use crate::feed::{FeedClient, FeedError};
use crate::gate::{GateError, GateOutcome, NotificationGate, NotificationRequest};
use crate::store::{BatchCommit, MappingDelta, PairSnapshot, StoreError, SyncStore};

/// One event that could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFailure {
    /// Source event id.
    pub event_id: String,
    /// Intended action (`create`, `update`, `delete`).
    pub action: &'static str,
    /// Error message.
    pub error: String,
}

impl From<&ApplyError> for EventFailure {
    fn from(err: &ApplyError) -> Self {
        let (event_id, action) = match err {
            ApplyError::Transient {
                event_id, action, ..
            }
            | ApplyError::Permanent {
                event_id, action, ..
            } => (event_id.clone(), *action),
        };
        Self {
            event_id,
            action,
            error: err.provider_error().to_string(),
        }
    }
}

/// Summary of one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Events returned by the change feed.
    pub fetched: usize,
    /// Mirrors inserted (recreations included).
    pub created: usize,
    /// Mirrors patched.
    pub updated: usize,
    /// Mirrors removed (already-missing ones included).
    pub deleted: usize,
    /// Events that needed no mirror change.
    pub skipped: usize,
    /// Events that failed.
    pub failures: Vec<EventFailure>,
    /// Whether the resume token moved forward.
    pub token_advanced: bool,
}

impl BatchReport {
    fn record(&mut self, kind: AppliedKind) {
        match kind {
            AppliedKind::Skipped(_) => self.skipped += 1,
            AppliedKind::Created | AppliedKind::Recreated => self.created += 1,
            AppliedKind::Updated => self.updated += 1,
            AppliedKind::Deleted | AppliedKind::AlreadyGone => self.deleted += 1,
        }
    }

    /// Returns the number of events that changed a mirror.
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Successful result of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// `sync` handshake.
    Acknowledged,
    /// Duplicate inside the debounce window.
    AlreadyProcessed,
    /// A batch ran (possibly with per-event failures).
    Processed(BatchReport),
    /// The resume token was stale and has been cleared.
    ResyncScheduled,
}

/// Failure of a whole notification.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected by the gate.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// State could not be loaded.
    #[error("failed to load sync state: {0}")]
    Load(#[source] StoreError),
    /// The change listing failed.
    #[error(transparent)]
    Feed(FeedError),
    /// The batch could not be committed.
    #[error("failed to commit sync state: {0}")]
    Commit(#[source] StoreError),
    /// The batch deadline passed; applied changes were committed.
    #[error("batch did not finish within {0:?}")]
    Timeout(Duration),
}

/// What the engine holds in memory for its pair.
#[derive(Debug, Default)]
struct PairCache {
    /// Last committed state with every applied mapping change on top.
    snapshot: PairSnapshot,
    /// Mapping changes already made on the target but not yet committed.
    unsaved: Vec<MappingDelta>,
}

impl PairCache {
    fn new(snapshot: PairSnapshot) -> Self {
        Self {
            snapshot,
            unsaved: Vec::new(),
        }
    }

    fn record(&mut self, delta: MappingDelta) {
        self.snapshot.apply(&delta);
        self.unsaved.push(delta);
    }
}

/// Sync engine of one calendar pair.
pub struct MirrorEngine {
    pair: PairConfig,
    gate: NotificationGate,
    feed: FeedClient<Arc<dyn ChangeFeed>>,
    applier: MirrorApplier<Arc<dyn CalendarMutator>>,
    store: Arc<dyn SyncStore>,
    batch_timeout: Duration,
    /// `None` until the first notification loads the store.
    cache: Mutex<Option<PairCache>>,
}

impl std::fmt::Debug for MirrorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorEngine")
            .field("pair", &self.pair.name)
            .field("source", &self.pair.source_calendar_id)
            .field("target", &self.pair.target_calendar_id)
            .finish_non_exhaustive()
    }
}

impl MirrorEngine {
    /// Creates an engine for `pair`.
    pub fn new(
        pair: PairConfig,
        feed: Arc<dyn ChangeFeed>,
        mutator: Arc<dyn CalendarMutator>,
        store: Arc<dyn SyncStore>,
        config: &ServerConfig,
    ) -> Self {
        let applier = MirrorApplier::new(
            mutator,
            pair.target_calendar_id.clone(),
            pair.policy.clone(),
            config.retry.clone(),
        );
        Self {
            gate: NotificationGate::new(config.debounce_window),
            feed: FeedClient::new(feed, config.retry.clone()),
            applier,
            store,
            batch_timeout: config.batch_timeout.min(MAX_BATCH_TIMEOUT),
            cache: Mutex::new(None),
            pair,
        }
    }

    /// Returns the pair name.
    pub fn name(&self) -> &str {
        &self.pair.name
    }

    /// Returns the pair configuration.
    pub fn pair(&self) -> &PairConfig {
        &self.pair
    }

    /// Handles one push notification.
    #[tracing::instrument(
        skip(self, request),
        fields(
            pair = %self.pair.name,
            channel_id = request.channel_id.as_deref().unwrap_or("-"),
            fetched,
            token_advanced,
        )
    )]
    pub async fn handle_notification(
        &self,
        request: NotificationRequest,
    ) -> Result<NotificationOutcome, EngineError> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            let snapshot = self
                .store
                .load(&self.pair.source_calendar_id)
                .map_err(EngineError::Load)?;
            *guard = Some(PairCache::new(snapshot));
        }
        // Filled just above.
        let cache = guard.get_or_insert_with(PairCache::default);

        let previous_notification = cache.snapshot.state.last_notification_time;
        match self.gate.check(&request, &mut cache.snapshot.state) {
            Ok(GateOutcome::Proceed) => {}
            Ok(GateOutcome::Acknowledged) => return Ok(NotificationOutcome::Acknowledged),
            Ok(GateOutcome::AlreadyProcessed) => return Ok(NotificationOutcome::AlreadyProcessed),
            Err(err) => {
                debug!(error = %err, "notification rejected");
                return Err(EngineError::Gate(err));
            }
        }

        let result = self.run_batch(cache).await;
        if let Err(EngineError::Feed(_) | EngineError::Commit(_)) = result {
            // The store did not record this notification, so its redelivery
            // must not be debounced.
            cache.snapshot.state.last_notification_time = previous_notification;
        }
        result
    }

    /// Fetches, applies and commits one batch for a notification that passed
    /// the gate.
    async fn run_batch(&self, cache: &mut PairCache) -> Result<NotificationOutcome, EngineError> {
        let deadline = Instant::now() + self.batch_timeout;

        if !cache.unsaved.is_empty() {
            let pending: Vec<&str> = cache
                .unsaved
                .iter()
                .map(MappingDelta::source_event_id)
                .collect();
            info!(?pending, "committing mappings left over from an earlier batch");
            let token = cache.snapshot.state.resume_token.clone();
            self.commit(cache, token)?;
        }

        let previous_token = cache.snapshot.state.resume_token.clone();
        let fetched = timeout_at(
            deadline,
            self.feed
                .fetch(&self.pair.source_calendar_id, previous_token.as_deref()),
        )
        .await;

        let batch = match fetched {
            Ok(Ok(batch)) => batch,
            Ok(Err(FeedError::Expired)) => {
                warn!("resume token expired, scheduling full resync");
                self.commit(cache, None)?;
                return Ok(NotificationOutcome::ResyncScheduled);
            }
            Ok(Err(err)) => {
                error!(error = %err, "change listing failed");
                return Err(EngineError::Feed(err));
            }
            Err(_) => {
                warn!(timeout = ?self.batch_timeout, "change listing timed out");
                self.commit(cache, previous_token)?;
                return Err(EngineError::Timeout(self.batch_timeout));
            }
        };

        let mut report = BatchReport {
            fetched: batch.events.len(),
            ..Default::default()
        };
        Span::current().record("fetched", report.fetched);

        let mut timed_out = false;

        for event in batch.events {
            let event_id = event.id.clone();
            let classification = classify(&event);
            let decision = decide(&classification, event, cache.snapshot.mapping(&event_id));

            match timeout_at(deadline, self.applier.apply(&decision)).await {
                Ok(Ok(applied)) => {
                    report.record(applied.kind);
                    if let Some(delta) = applied.delta {
                        cache.record(delta);
                    }
                }
                Ok(Err(err)) => {
                    warn!(event_id = %event_id, action = decision.action.name(), error = %err, "failed to mirror event");
                    report.failures.push(EventFailure::from(&err));
                }
                Err(_) => {
                    warn!(event_id = %event_id, timeout = ?self.batch_timeout, "batch deadline reached");
                    timed_out = true;
                    break;
                }
            }
        }

        report.token_advanced = !timed_out && report.failures.is_empty();
        let resume_token = if report.token_advanced {
            batch.next_resume_token
        } else {
            previous_token
        };
        Span::current().record("token_advanced", report.token_advanced);

        self.commit(cache, resume_token)?;

        if timed_out {
            return Err(EngineError::Timeout(self.batch_timeout));
        }

        info!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            failed = report.failures.len(),
            token_advanced = report.token_advanced,
            "batch processed"
        );
        Ok(NotificationOutcome::Processed(report))
    }

    /// Persists the cached state under `resume_token`, together with every
    /// unsaved mapping change.
    ///
    /// A failed commit leaves the cache as it was: the applied mappings stay
    /// in memory, the committed resume token is kept, and the changes are
    /// committed again by the next notification.
    fn commit(&self, cache: &mut PairCache, resume_token: Option<String>) -> Result<(), EngineError> {
        let commit = BatchCommit::new(&cache.snapshot.state)
            .with_resume_token(resume_token)
            .with_deltas(mem::take(&mut cache.unsaved));

        if let Err(err) = self.store.commit(&self.pair.source_calendar_id, &commit) {
            error!(error = %err, unsaved = commit.deltas.len(), "failed to commit sync state");
            cache.unsaved = commit.deltas;
            return Err(EngineError::Commit(err));
        }

        cache.snapshot.state.resume_token = commit.resume_token;
        Ok(())
    }
}
