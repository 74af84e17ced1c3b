//! End-to-end engine behaviour against in-memory calendars.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mirrorsync_core::{
    ChangedEvent, EventStatus, EventTime, EventType, MirrorBody, MirrorPolicy, ResponseStatus,
};
use mirrorsync_providers::{
    BoxFuture, CalendarMutator, ChangeFeed, ChangePage, ChangeQuery, ProviderError,
    ProviderResult,
};
use mirrorsync_server::{
    BatchCommit, EngineError, MemoryStore, MirrorEngine, NotificationOutcome, NotificationRequest,
    PairConfig, PairSnapshot, RetryPolicy, ServerConfig, StoreError, SyncStore,
};

const SOURCE: &str = "me@work.example";
const TARGET: &str = "me@home.example";
const SUFFIX: &str = "Mirrored from work";

/// Change feed replaying one scripted response per call.
#[derive(Default)]
struct FakeFeed {
    responses: Mutex<VecDeque<ProviderResult<ChangePage>>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl FakeFeed {
    fn push_events(&self, events: Vec<ChangedEvent>, sync_token: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ChangePage::with_events(events).with_sync_token(sync_token)));
    }

    fn push_error(&self, err: ProviderError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

impl ChangeFeed for FakeFeed {
    fn name(&self) -> &str {
        "fake"
    }

    fn list_changes<'a>(
        &'a self,
        _calendar_id: &'a str,
        query: ChangeQuery<'a>,
    ) -> BoxFuture<'a, ProviderResult<ChangePage>> {
        self.tokens
            .lock()
            .unwrap()
            .push(query.sync_token.map(str::to_string));
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ChangePage::default().with_sync_token("idle")));
        Box::pin(async move { response })
    }
}

/// Target calendar holding mirror bodies by id.
#[derive(Default)]
struct FakeTarget {
    events: Mutex<BTreeMap<String, MirrorBody>>,
    next_id: AtomicUsize,
    writes: AtomicUsize,
    /// Summaries whose writes fail with 403.
    rejected: Mutex<HashSet<String>>,
    /// Summaries whose inserts take this long.
    slow: Mutex<Option<(String, Duration)>>,
}

impl FakeTarget {
    fn reject(&self, summary: &str) {
        self.rejected.lock().unwrap().insert(summary.to_string());
    }

    fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }

    fn events(&self) -> BTreeMap<String, MirrorBody> {
        self.events.lock().unwrap().clone()
    }

    fn check(&self, body: &MirrorBody) -> ProviderResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().unwrap().contains(&body.summary) {
            return Err(ProviderError::authorization("403 forbidden"));
        }
        Ok(())
    }
}

impl CalendarMutator for FakeTarget {
    fn name(&self) -> &str {
        "fake"
    }

    fn insert<'a>(
        &'a self,
        _calendar_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let delay = self
                .slow
                .lock()
                .unwrap()
                .as_ref()
                .filter(|(summary, _)| *summary == body.summary)
                .map(|(_, delay)| *delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.check(body)?;
            let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.events.lock().unwrap().insert(id.clone(), body.clone());
            Ok(id)
        })
    }

    fn patch<'a>(
        &'a self,
        _calendar_id: &'a str,
        event_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.check(body)?;
            let mut events = self.events.lock().unwrap();
            match events.get_mut(event_id) {
                Some(existing) => {
                    *existing = body.clone();
                    Ok(())
                }
                None => Err(ProviderError::not_found(format!("no event {event_id}"))),
            }
        })
    }

    fn delete<'a>(
        &'a self,
        _calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            match self.events.lock().unwrap().remove(event_id) {
                Some(_) => Ok(()),
                None => Err(ProviderError::gone(format!("event {event_id} deleted"))),
            }
        })
    }
}

/// Store whose commits fail while `broken` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: Mutex<bool>,
    loads: AtomicUsize,
}

impl SyncStore for FlakyStore {
    fn load(&self, source_calendar_id: &str) -> Result<PairSnapshot, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(source_calendar_id)
    }

    fn commit(&self, source_calendar_id: &str, commit: &BatchCommit) -> Result<(), StoreError> {
        if *self.broken.lock().unwrap() {
            return Err(StoreError::Io {
                path: "/state".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.commit(source_calendar_id, commit)
    }
}

struct Harness {
    feed: Arc<FakeFeed>,
    target: Arc<FakeTarget>,
    store: Arc<dyn SyncStore>,
    engine: MirrorEngine,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Duration::from_secs(60))
    }

    fn with_store(store: Arc<dyn SyncStore>, batch_timeout: Duration) -> Self {
        let feed = Arc::new(FakeFeed::default());
        let target = Arc::new(FakeTarget::default());
        let pair = PairConfig::new("work", SOURCE, TARGET).with_policy(
            MirrorPolicy::new()
                .with_prefix("[WORK]")
                .with_suffix(SUFFIX)
                .with_color_id("11"),
        );
        let config = ServerConfig::default()
            .with_batch_timeout(batch_timeout)
            .with_retry(
                RetryPolicy::default()
                    .with_backoff(Duration::ZERO, Duration::ZERO, 2.0)
                    .with_jitter(0.0),
            );
        let engine = MirrorEngine::new(pair, feed.clone(), target.clone(), store.clone(), &config);
        Self {
            feed,
            target,
            store,
            engine,
        }
    }

    fn snapshot(&self) -> PairSnapshot {
        self.store.load(SOURCE).unwrap()
    }

    async fn notify_at(&self, at: DateTime<Utc>) -> Result<NotificationOutcome, EngineError> {
        self.engine
            .handle_notification(NotificationRequest::post("exists").received_at(at))
            .await
    }
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn meeting(id: &str, summary: &str) -> ChangedEvent {
    let start = EventTime::from_utc(Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap());
    let end = EventTime::from_utc(Utc.with_ymd_and_hms(2024, 3, 6, 15, 0, 0).unwrap());
    ChangedEvent::new(id)
        .with_summary(summary)
        .with_description("Agenda in doc")
        .with_times(start, end)
        .with_responses(ResponseStatus::Accepted, ResponseStatus::NeedsAction)
}

fn processed(outcome: NotificationOutcome) -> mirrorsync_server::BatchReport {
    match outcome {
        NotificationOutcome::Processed(report) => report,
        other => panic!("expected a processed batch, got {other:?}"),
    }
}

#[tokio::test]
async fn new_meeting_is_mirrored_with_policy() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");

    let report = processed(h.notify_at(t(0)).await.unwrap());
    assert_eq!(report.fetched, 1);
    assert_eq!(report.created, 1);
    assert!(report.token_advanced);

    let events = h.target.events();
    assert_eq!(events.len(), 1);
    let mirror = &events["m1"];
    assert_eq!(mirror.summary, "[WORK] Planning");
    assert!(mirror.description.as_deref().unwrap().ends_with(SUFFIX));
    assert_eq!(mirror.color_id.as_deref(), Some("11"));

    let snapshot = h.snapshot();
    assert_eq!(snapshot.state.resume_token.as_deref(), Some("s1"));
    assert_eq!(snapshot.state.last_notification_time, Some(t(0)));
    assert_eq!(snapshot.mapping("E1").unwrap().target_event_id, "m1");
}

#[tokio::test]
async fn cancelled_meeting_removes_mirror_and_mapping() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();

    h.feed.push_events(
        vec![meeting("E1", "Planning").with_status(EventStatus::Cancelled)],
        "s2",
    );
    let report = processed(h.notify_at(t(10)).await.unwrap());
    assert_eq!(report.deleted, 1);

    assert!(h.target.events().is_empty());
    let snapshot = h.snapshot();
    assert!(snapshot.mapping("E1").is_none());
    assert_eq!(snapshot.state.resume_token.as_deref(), Some("s2"));

    // Redelivery of the same cancellation does not delete again.
    let writes = h.target.writes.load(Ordering::SeqCst);
    h.feed.push_events(
        vec![meeting("E1", "Planning").with_status(EventStatus::Cancelled)],
        "s3",
    );
    let report = processed(h.notify_at(t(20)).await.unwrap());
    assert_eq!(report.skipped, 1);
    assert_eq!(h.target.writes.load(Ordering::SeqCst), writes);
}

#[tokio::test]
async fn declining_removes_mirror() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();

    h.feed.push_events(
        vec![meeting("E1", "Planning")
            .with_responses(ResponseStatus::Declined, ResponseStatus::NeedsAction)],
        "s2",
    );
    let report = processed(h.notify_at(t(5)).await.unwrap());
    assert_eq!(report.deleted, 1);
    assert!(h.target.events().is_empty());
}

#[tokio::test]
async fn repeated_update_is_content_idempotent() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();
    let after_create = h.target.events();

    h.feed.push_events(vec![meeting("E1", "Planning")], "s2");
    let report = processed(h.notify_at(t(5)).await.unwrap());
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);
    assert_eq!(h.target.events(), after_create);
}

#[tokio::test]
async fn vanished_mirror_is_recreated_on_update() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();
    h.target.events.lock().unwrap().clear();

    h.feed.push_events(vec![meeting("E1", "Planning v2")], "s2");
    let report = processed(h.notify_at(t(5)).await.unwrap());
    assert_eq!(report.created, 1);

    let events = h.target.events();
    assert_eq!(events["m2"].summary, "[WORK] Planning v2");
    assert_eq!(h.snapshot().mapping("E1").unwrap().target_event_id, "m2");
}

#[tokio::test]
async fn filtered_events_cause_no_writes() {
    let h = Harness::new();
    let birthday = meeting("E1", "Bob").with_type(EventType::from_name("birthday"));
    let settled = meeting("E2", "1:1")
        .with_responses(ResponseStatus::Accepted, ResponseStatus::Declined);
    h.feed.push_events(vec![birthday, settled], "s1");

    let report = processed(h.notify_at(t(0)).await.unwrap());
    assert_eq!(report.skipped, 2);
    assert!(report.token_advanced);
    assert_eq!(h.target.writes.load(Ordering::SeqCst), 0);
    assert_eq!(h.snapshot().state.resume_token.as_deref(), Some("s1"));
}

#[tokio::test]
async fn sync_handshake_does_not_fetch() {
    let h = Harness::new();
    let outcome = h
        .engine
        .handle_notification(NotificationRequest::post("sync").received_at(t(0)))
        .await
        .unwrap();

    assert_eq!(outcome, NotificationOutcome::Acknowledged);
    assert!(h.feed.tokens().is_empty());
}

#[tokio::test]
async fn notifications_within_a_second_run_once() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");

    let first = h.notify_at(t(0)).await.unwrap();
    let second = h
        .notify_at(t(0) + chrono::Duration::milliseconds(400))
        .await
        .unwrap();

    assert!(matches!(first, NotificationOutcome::Processed(_)));
    assert_eq!(second, NotificationOutcome::AlreadyProcessed);
    assert_eq!(h.feed.tokens().len(), 1);
}

#[tokio::test]
async fn concurrent_notifications_are_serialised() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");

    let (a, b) = tokio::join!(h.notify_at(t(0)), h.notify_at(t(0)));
    let outcomes = [a.unwrap(), b.unwrap()];
    let processed = outcomes
        .iter()
        .filter(|o| matches!(o, NotificationOutcome::Processed(_)))
        .count();

    assert_eq!(processed, 1);
    assert!(outcomes.contains(&NotificationOutcome::AlreadyProcessed));
    assert_eq!(h.target.events().len(), 1);
}

#[tokio::test]
async fn expired_token_triggers_full_resync() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();

    h.feed.push_error(ProviderError::invalid_sync_token("410 gone"));
    let outcome = h.notify_at(t(10)).await.unwrap();
    assert_eq!(outcome, NotificationOutcome::ResyncScheduled);
    assert!(h.snapshot().state.resume_token.is_none());

    // The full listing reports E1 again; it maps to an update, not a duplicate.
    h.feed.push_events(vec![meeting("E1", "Planning")], "s9");
    let report = processed(h.notify_at(t(20)).await.unwrap());
    assert_eq!(report.updated, 1);
    assert_eq!(h.target.events().len(), 1);

    assert_eq!(
        h.feed.tokens(),
        vec![None, Some("s1".to_string()), None]
    );
    assert_eq!(h.snapshot().state.resume_token.as_deref(), Some("s9"));
}

#[tokio::test]
async fn failed_event_holds_token_but_keeps_applied_mappings() {
    let h = Harness::new();
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();

    h.target.reject("[WORK] Review");
    h.feed.push_events(
        vec![meeting("E2", "Retro"), meeting("E3", "Review")],
        "s2",
    );
    let report = processed(h.notify_at(t(10)).await.unwrap());
    assert_eq!(report.created, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].event_id, "E3");
    assert_eq!(report.failures[0].action, "create");
    assert!(!report.token_advanced);

    let snapshot = h.snapshot();
    assert_eq!(snapshot.state.resume_token.as_deref(), Some("s1"));
    assert!(snapshot.mapping("E2").is_some());
    assert!(snapshot.mapping("E3").is_none());

    // Redelivery from the held token converges without duplicating E2.
    h.target.accept_all();
    h.feed.push_events(
        vec![meeting("E2", "Retro"), meeting("E3", "Review")],
        "s2",
    );
    let report = processed(h.notify_at(t(20)).await.unwrap());
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);
    assert!(report.token_advanced);
    assert_eq!(h.target.events().len(), 3);
    assert_eq!(h.feed.tokens().last().unwrap().as_deref(), Some("s1"));
}

#[tokio::test]
async fn fatal_feed_error_commits_nothing() {
    let h = Harness::new();
    h.feed.push_error(ProviderError::authentication("401"));

    let err = h.notify_at(t(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Feed(_)));
    assert_eq!(h.snapshot(), PairSnapshot::default());
}

#[tokio::test]
async fn feed_failure_does_not_debounce_redelivery() {
    let h = Harness::new();
    h.feed.push_error(ProviderError::authentication("401"));
    assert!(h.notify_at(t(0)).await.is_err());

    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    let report = processed(
        h.notify_at(t(0) + chrono::Duration::milliseconds(400))
            .await
            .unwrap(),
    );
    assert_eq!(report.created, 1);
}

#[tokio::test]
async fn failed_commit_keeps_applied_mappings() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::with_store(store.clone(), Duration::from_secs(60));

    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    h.notify_at(t(0)).await.unwrap();

    *store.broken.lock().unwrap() = true;
    h.feed.push_events(vec![meeting("E2", "Retro")], "s2");
    let err = h.notify_at(t(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::Commit(_)));
    assert_eq!(h.target.events().len(), 2);
    assert!(store.inner.load(SOURCE).unwrap().mapping("E2").is_none());

    // Redelivery from the committed token updates the mirror it already made.
    *store.broken.lock().unwrap() = false;
    h.feed.push_events(vec![meeting("E2", "Retro")], "s2");
    let report = processed(h.notify_at(t(20)).await.unwrap());
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);

    let retro = h
        .target
        .events()
        .values()
        .filter(|body| body.summary == "[WORK] Retro")
        .count();
    assert_eq!(retro, 1);
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    assert_eq!(h.feed.tokens().last().unwrap().as_deref(), Some("s1"));

    let snapshot = store.inner.load(SOURCE).unwrap();
    assert_eq!(snapshot.mapping("E2").unwrap().target_event_id, "m2");
    assert_eq!(snapshot.state.resume_token.as_deref(), Some("s2"));
}

#[tokio::test]
async fn unsaved_mappings_are_committed_before_the_next_fetch() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::with_store(store.clone(), Duration::from_secs(60));

    *store.broken.lock().unwrap() = true;
    h.feed.push_events(vec![meeting("E1", "Planning")], "s1");
    assert!(h.notify_at(t(0)).await.is_err());

    // Still broken: the leftover commit fails again and nothing is fetched.
    let err = h.notify_at(t(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::Commit(_)));
    assert_eq!(h.feed.tokens().len(), 1);

    *store.broken.lock().unwrap() = false;
    processed(h.notify_at(t(20)).await.unwrap());
    let snapshot = store.inner.load(SOURCE).unwrap();
    assert_eq!(snapshot.mapping("E1").unwrap().target_event_id, "m1");
    assert_eq!(h.target.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_batch_keeps_applied_mappings() {
    let h = Harness::new();
    *h.target.slow.lock().unwrap() = Some(("[WORK] Slow".to_string(), Duration::from_secs(30)));
    h.feed
        .push_events(vec![meeting("E1", "Planning"), meeting("E2", "Slow")], "s1");

    let dropped = tokio::time::timeout(Duration::from_secs(1), h.notify_at(t(0))).await;
    assert!(dropped.is_err());
    assert_eq!(h.target.events().len(), 1);

    *h.target.slow.lock().unwrap() = None;
    h.feed
        .push_events(vec![meeting("E1", "Planning"), meeting("E2", "Slow")], "s1");
    let report = processed(h.notify_at(t(10)).await.unwrap());
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);

    let events = h.target.events();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events.values().filter(|body| body.summary == "[WORK] Planning").count(),
        1
    );
    let snapshot = h.snapshot();
    assert_eq!(snapshot.mapping("E1").unwrap().target_event_id, "m1");
    assert_eq!(snapshot.state.resume_token.as_deref(), Some("s1"));
}

#[tokio::test]
async fn oversized_batch_timeout_is_capped() {
    let feed = Arc::new(FakeFeed::default());
    let target = Arc::new(FakeTarget::default());
    let mut config = ServerConfig::default();
    config.batch_timeout = Duration::MAX;
    let engine = MirrorEngine::new(
        PairConfig::new("work", SOURCE, TARGET),
        feed.clone(),
        target.clone(),
        Arc::new(MemoryStore::new()),
        &config,
    );

    feed.push_events(vec![meeting("E1", "Planning")], "s1");
    let outcome = engine
        .handle_notification(NotificationRequest::post("exists").received_at(t(0)))
        .await
        .unwrap();
    assert_eq!(processed(outcome).created, 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_commits_applied_work_with_previous_token() {
    let h = Harness::with_store(Arc::new(MemoryStore::new()), Duration::from_secs(5));
    *h.target.slow.lock().unwrap() = Some(("[WORK] Slow".to_string(), Duration::from_secs(30)));

    h.feed.push_events(
        vec![meeting("E1", "Planning"), meeting("E2", "Slow"), meeting("E3", "Later")],
        "s1",
    );
    let err = h.notify_at(t(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));

    let snapshot = h.snapshot();
    assert!(snapshot.state.resume_token.is_none());
    assert!(snapshot.mapping("E1").is_some());
    assert!(snapshot.mapping("E2").is_none());
    assert!(snapshot.mapping("E3").is_none());
    assert_eq!(snapshot.state.last_notification_time, Some(t(0)));
}
