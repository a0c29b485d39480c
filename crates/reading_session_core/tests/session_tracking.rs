//! End-to-end behaviour of the session tracker on a paused clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reading_session_core::{
    BookId, BookIdentity, CompletedSession, DrainSummary, IdentityResolver, PortError, PortResult, SessionId,
    SessionKey, SessionSink, SessionTracker, SyncEvent, SyncKind, TrackerConfig, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

//=========================================================================================
// Fakes
//=========================================================================================

struct FakeResolver {
    users: HashMap<String, UserId>,
    books: HashMap<String, BookIdentity>,
    broken: bool,
}

impl FakeResolver {
    fn library() -> Self {
        let users = HashMap::from([("alice".to_string(), 1), ("bob".to_string(), 2)]);
        let books = HashMap::from([
            (
                "hash-a".to_string(),
                BookIdentity { book_id: 10, book_type: "EPUB".to_string() },
            ),
            (
                "hash-b".to_string(),
                BookIdentity { book_id: 20, book_type: "PDF".to_string() },
            ),
        ]);
        Self { users, books, broken: false }
    }
}

#[async_trait]
impl IdentityResolver for FakeResolver {
    async fn resolve_user(&self, username: &str) -> PortResult<Option<UserId>> {
        if self.broken {
            return Err(PortError::Unavailable("pool timed out".to_string()));
        }
        Ok(self.users.get(username).copied())
    }

    async fn resolve_book(&self, content_hash: &str) -> PortResult<Option<BookIdentity>> {
        Ok(self.books.get(content_hash).cloned())
    }
}

/// Parks every user lookup until the test opens the gate.
struct GatedResolver {
    inner: FakeResolver,
    entered: Notify,
    gate: Notify,
}

#[async_trait]
impl IdentityResolver for GatedResolver {
    async fn resolve_user(&self, username: &str) -> PortResult<Option<UserId>> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.resolve_user(username).await
    }

    async fn resolve_book(&self, content_hash: &str) -> PortResult<Option<BookIdentity>> {
        self.inner.resolve_book(content_hash).await
    }
}

#[derive(Default)]
struct RecordingSink {
    written: Mutex<Vec<CompletedSession>>,
    attempts: Mutex<usize>,
    failing_books: Vec<BookId>,
}

impl RecordingSink {
    fn failing_for(book_id: BookId) -> Self {
        Self {
            failing_books: vec![book_id],
            ..Self::default()
        }
    }

    fn written(&self) -> Vec<CompletedSession> {
        self.written.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn persist(&self, session: &CompletedSession) -> PortResult<SessionId> {
        *self.attempts.lock().unwrap() += 1;
        if self.failing_books.contains(&session.book_id) {
            return Err(PortError::Unexpected("Deadlock found when trying to get lock".to_string()));
        }
        let mut written = self.written.lock().unwrap();
        written.push(session.clone());
        Ok(written.len() as SessionId)
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap() + ChronoDuration::seconds(secs)
}

fn event<'a>(
    kind: SyncKind,
    username: &'a str,
    hash: &'a str,
    progress: f64,
    location: &'a str,
    at: DateTime<Utc>,
) -> SyncEvent<'a> {
    SyncEvent {
        kind,
        username,
        content_hash: hash,
        progress,
        location,
        at,
    }
}

fn start(sink: Arc<RecordingSink>) -> Arc<SessionTracker> {
    SessionTracker::start(TrackerConfig::default(), Arc::new(FakeResolver::library()), sink)
}

const ALICE_A: SessionKey = SessionKey { user_id: 1, book_id: 10 };
const BOB_B: SessionKey = SessionKey { user_id: 2, book_id: 20 };

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

//=========================================================================================
// Expiry
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn writes_coalesce_into_one_session_after_inactivity() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;
    sleep(Duration::from_secs(30)).await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.15, "L2", t(30)))
        .await;

    // The first arming comes due at 10:00 but has been superseded.
    sleep(Duration::from_secs(9 * 60 + 45)).await;
    assert!(sink.written().is_empty());
    assert_eq!(tracker.active_sessions().await, 1);

    sleep(minutes(1)).await;
    let written = sink.written();
    assert_eq!(written.len(), 1);
    let session = &written[0];
    assert_eq!(session.user_id, 1);
    assert_eq!(session.book_id, 10);
    assert_eq!(session.book_type, "EPUB");
    assert_eq!(session.start_progress, 10.0);
    assert_eq!(session.end_progress, 15.0);
    assert_eq!(session.progress_delta, 5.0);
    assert_eq!(session.start_location, "L1");
    assert_eq!(session.end_location, "L2");
    assert_eq!(session.start_time, t(0));
    assert_eq!(session.end_time, t(30));
    assert_eq!(session.duration_seconds, 30);
    assert_eq!(tracker.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn many_writes_keep_first_start_and_last_end() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    let steps = [(0, 0.20, "S1"), (60, 0.22, "S2"), (120, 0.25, "S3"), (180, 0.31, "S4")];
    let mut elapsed = 0;
    for (at, progress, location) in steps {
        sleep(Duration::from_secs(at - elapsed)).await;
        elapsed = at;
        tracker
            .handle_sync(event(SyncKind::Write, "alice", "hash-a", progress, location, t(at as i64)))
            .await;
    }

    sleep(minutes(11)).await;
    let written = sink.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].start_progress, 20.0);
    assert_eq!(written[0].end_progress, 31.0);
    assert_eq!(written[0].start_location, "S1");
    assert_eq!(written[0].end_location, "S4");
    assert_eq!(written[0].duration_seconds, 180);
}

#[tokio::test(start_paused = true)]
async fn unchanged_progress_is_discarded() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.20, "L1", t(0)))
        .await;
    sleep(Duration::from_secs(5)).await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.20, "L1", t(5)))
        .await;

    sleep(minutes(11)).await;
    assert_eq!(sink.attempts(), 0);
    assert_eq!(tracker.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn reads_keep_a_session_alive_without_extending_it() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;
    sleep(Duration::from_secs(60)).await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.12, "L2", t(60)))
        .await;
    sleep(minutes(8)).await;
    tracker
        .handle_sync(event(SyncKind::Read, "alice", "hash-a", 0.12, "L2", t(540)))
        .await;

    // Without the read the session would have expired at 11:00.
    sleep(minutes(5)).await;
    assert!(sink.written().is_empty());
    assert_eq!(tracker.active_sessions().await, 1);

    sleep(minutes(6)).await;
    let written = sink.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].end_time, t(60));
    assert_eq!(written[0].duration_seconds, 60);
}

#[tokio::test(start_paused = true)]
async fn completed_key_starts_fresh_on_next_event() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;
    sleep(Duration::from_secs(20)).await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.20, "L2", t(20)))
        .await;
    sleep(minutes(11)).await;
    assert_eq!(sink.written().len(), 1);
    assert!(tracker.session(&ALICE_A).await.is_none());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.50, "L7", t(700)))
        .await;
    let fresh = tracker.session(&ALICE_A).await.unwrap();
    assert_eq!(fresh.start_progress, 0.50);
    assert_eq!(fresh.start_location, "L7");
    assert_eq!(fresh.start_time, t(700));
}

//=========================================================================================
// Dropped events
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn unknown_identities_create_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "mallory", "hash-a", 0.1, "L1", t(0)))
        .await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-unknown", 0.1, "L1", t(0)))
        .await;

    assert_eq!(tracker.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn resolver_failures_are_absorbed() {
    let sink = Arc::new(RecordingSink::default());
    let resolver = FakeResolver {
        broken: true,
        ..FakeResolver::library()
    };
    let tracker = SessionTracker::start(TrackerConfig::default(), Arc::new(resolver), sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.1, "L1", t(0)))
        .await;

    assert_eq!(tracker.active_sessions().await, 0);
    assert_eq!(tracker.drain().await.drained, 0);
}

//=========================================================================================
// Drain
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn drain_discards_sessions_below_minimum_duration() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;
    sleep(Duration::from_secs(3)).await;

    let summary = tracker.drain().await;
    assert_eq!(summary.drained, 1);
    assert_eq!(summary.discarded, 1);
    assert_eq!(sink.attempts(), 0);
    assert_eq!(tracker.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn drain_persists_every_eligible_session() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "A1", t(0)))
        .await;
    tracker
        .handle_sync(event(SyncKind::Write, "bob", "hash-b", 0.40, "B1", t(0)))
        .await;
    sleep(minutes(2)).await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.12, "A2", t(120)))
        .await;
    tracker
        .handle_sync(event(SyncKind::Write, "bob", "hash-b", 0.45, "B2", t(120)))
        .await;

    let summary = tracker.drain().await;
    assert_eq!(summary.drained, 2);
    assert_eq!(summary.persisted, 2);
    assert_eq!(tracker.active_sessions().await, 0);

    let mut keys: Vec<SessionKey> = sink
        .written()
        .iter()
        .map(|s| SessionKey::new(s.user_id, s.book_id))
        .collect();
    keys.sort();
    assert_eq!(keys, vec![ALICE_A, BOB_B]);
}

#[tokio::test(start_paused = true)]
async fn drain_keeps_going_after_a_failed_write() {
    let sink = Arc::new(RecordingSink::failing_for(10));
    let tracker = start(sink.clone());

    for (at, a, b) in [(0, 0.10, 0.40), (60, 0.20, 0.50)] {
        sleep(Duration::from_secs(at)).await;
        tracker
            .handle_sync(event(SyncKind::Write, "alice", "hash-a", a, "A", t(at as i64)))
            .await;
        tracker
            .handle_sync(event(SyncKind::Write, "bob", "hash-b", b, "B", t(at as i64)))
            .await;
    }

    let summary = tracker.drain().await;
    assert_eq!(summary.drained, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.persisted, 1);
    assert_eq!(sink.attempts(), 2);

    let written = sink.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].book_id, 20);
}

#[tokio::test(start_paused = true)]
async fn drain_cancels_timers_so_nothing_completes_twice() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;
    sleep(Duration::from_secs(30)).await;
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.30, "L3", t(30)))
        .await;

    let summary = tracker.drain().await;
    assert_eq!(summary.persisted, 1);

    sleep(minutes(30)).await;
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn events_after_drain_are_dropped_and_second_drain_is_empty() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = start(sink.clone());

    assert_eq!(tracker.drain().await.drained, 0);

    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;
    assert_eq!(tracker.active_sessions().await, 0);
    assert_eq!(tracker.drain().await, DrainSummary::default());
}

#[tokio::test(start_paused = true)]
async fn event_resolving_during_drain_leaves_nothing_behind() {
    let sink = Arc::new(RecordingSink::default());
    let resolver = Arc::new(GatedResolver {
        inner: FakeResolver::library(),
        entered: Notify::new(),
        gate: Notify::new(),
    });
    let tracker = SessionTracker::start(TrackerConfig::default(), resolver.clone(), sink.clone());

    let straggler = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tracker
                .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
                .await
        })
    };
    resolver.entered.notified().await;

    assert_eq!(tracker.drain().await.drained, 0);
    resolver.gate.notify_one();
    straggler.await.unwrap();

    assert_eq!(tracker.active_sessions().await, 0);
    assert_eq!(tracker.drain().await, DrainSummary::default());
    assert_eq!(sink.attempts(), 0);
}

//=========================================================================================
// Lifetime
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn dropping_the_tracker_releases_it_and_its_ports() {
    let sink = Arc::new(RecordingSink::default());
    let resolver = Arc::new(FakeResolver::library());
    let tracker = SessionTracker::start(TrackerConfig::default(), resolver.clone(), sink.clone());
    tracker
        .handle_sync(event(SyncKind::Write, "alice", "hash-a", 0.10, "L1", t(0)))
        .await;

    let weak = Arc::downgrade(&tracker);
    drop(tracker);
    tokio::task::yield_now().await;

    assert!(weak.upgrade().is_none());
    assert_eq!(Arc::strong_count(&resolver), 1);
    assert_eq!(Arc::strong_count(&sink), 1);

    sleep(minutes(30)).await;
    assert_eq!(sink.attempts(), 0);
}
