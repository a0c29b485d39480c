//! crates/reading_session_core/src/tracker.rs
//!
//! The session tracker: the one context object that owns the registry and the
//! expiry scheduler, and the entry points the host calls into.
//!
//! `handle_sync` turns a proxied sync call into a registry upsert plus a timer
//! re-arm. Expired and drained records both leave through `complete`, which
//! runs the persistence policy and hands eligible sessions to the sink. No
//! lock is held while the resolver or the sink is awaited.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::domain::{SessionId, SessionKey, SessionRecord, SyncKind};
use crate::policy::{Eligibility, IneligibleReason, PersistencePolicy};
use crate::ports::{IdentityResolver, PortError, SessionSink};
use crate::registry::SessionRegistry;
use crate::scheduler::{Expiry, ExpiryScheduler};

//=========================================================================================
// Configuration and Inputs
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Inactivity after which a session is considered complete.
    pub inactivity_timeout: Duration,
    pub min_duration_seconds: u64,
    pub progress_decimal_places: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(10 * 60),
            min_duration_seconds: 10,
            progress_decimal_places: 1,
        }
    }
}

/// One proxied sync call, reported after the backend accepted it.
#[derive(Debug, Clone)]
pub struct SyncEvent<'a> {
    pub kind: SyncKind,
    pub username: &'a str,
    pub content_hash: &'a str,
    /// Completion fraction in [0,1].
    pub progress: f64,
    pub location: &'a str,
    pub at: DateTime<Utc>,
}

//=========================================================================================
// Outcomes
//=========================================================================================

#[derive(Debug, thiserror::Error)]
enum TrackingError {
    #[error("User {0} not found in database")]
    UnknownUser(String),
    #[error("Book with hash {0} not found in database")]
    UnknownBook(String),
    #[error("tracker is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Port(#[from] PortError),
}

/// What happened to a record once it left the registry.
#[derive(Debug)]
pub enum Completion {
    Persisted(SessionId),
    Discarded(IneligibleReason),
    Failed(PortError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCause {
    Expired,
    Drained,
}

impl fmt::Display for CompletionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionCause::Expired => f.write_str("timeout"),
            CompletionCause::Drained => f.write_str("shutdown"),
        }
    }
}

/// Tally of one `drain` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub drained: usize,
    pub persisted: usize,
    pub discarded: usize,
    pub failed: usize,
}

//=========================================================================================
// The Tracker
//=========================================================================================

pub struct SessionTracker {
    registry: SessionRegistry,
    scheduler: Arc<ExpiryScheduler>,
    policy: PersistencePolicy,
    inactivity_timeout: Duration,
    resolver: Arc<dyn IdentityResolver>,
    sink: Arc<dyn SessionSink>,
    /// Completions started by expiries; drain waits for them.
    completions: TaskTracker,
    expiry_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SessionTracker {
    /// Builds the tracker and spawns its expiry loop on the current runtime.
    pub fn start(
        config: TrackerConfig,
        resolver: Arc<dyn IdentityResolver>,
        sink: Arc<dyn SessionSink>,
    ) -> Arc<Self> {
        let tracker = Arc::new(Self {
            registry: SessionRegistry::new(),
            scheduler: Arc::new(ExpiryScheduler::new()),
            policy: PersistencePolicy::new(
                config.min_duration_seconds,
                config.progress_decimal_places,
            ),
            inactivity_timeout: config.inactivity_timeout,
            resolver,
            sink,
            completions: TaskTracker::new(),
            expiry_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_expiry_loop(
            Arc::clone(&tracker.scheduler),
            Arc::downgrade(&tracker),
        ));
        // Nothing else can hold the lock before `start` returns.
        if let Ok(mut slot) = tracker.expiry_loop.try_lock() {
            *slot = Some(handle);
        }
        info!(
            timeout_secs = config.inactivity_timeout.as_secs(),
            min_duration_secs = config.min_duration_seconds,
            "Session tracker started"
        );
        tracker
    }

    /// Records one sync event. Never fails: every problem is logged and the
    /// event is dropped, since the client's response does not depend on it.
    pub async fn handle_sync(&self, event: SyncEvent<'_>) {
        match self.try_handle_sync(&event).await {
            Ok(()) => {}
            Err(e @ (TrackingError::UnknownUser(_) | TrackingError::UnknownBook(_))) => {
                warn!("{e}");
            }
            Err(TrackingError::ShuttingDown) => {
                debug!(
                    username = event.username,
                    "Dropping sync event received during shutdown"
                );
            }
            Err(TrackingError::Port(e)) => {
                error!(error = %e, username = event.username, "Error handling session");
            }
        }
    }

    async fn try_handle_sync(&self, event: &SyncEvent<'_>) -> Result<(), TrackingError> {
        if self.scheduler.is_cancelled() {
            return Err(TrackingError::ShuttingDown);
        }

        let user_id = self
            .resolver
            .resolve_user(event.username)
            .await?
            .ok_or_else(|| TrackingError::UnknownUser(event.username.to_string()))?;
        let book = self
            .resolver
            .resolve_book(event.content_hash)
            .await?
            .ok_or_else(|| TrackingError::UnknownBook(event.content_hash.to_string()))?;

        let progress = sanitize_progress(event.progress);
        let key = SessionKey::new(user_id, book.book_id);
        // Drain may have started while the resolver was awaited. A closed
        // registry refuses the event; a record that got in before it closed
        // is taken by the drain even when arming below fails.
        let snapshot = self
            .registry
            .record_event(
                key,
                event.kind,
                progress,
                event.location,
                &book.book_type,
                event.at,
            )
            .await
            .ok_or(TrackingError::ShuttingDown)?;

        if !self
            .scheduler
            .arm(key, snapshot.timer, self.inactivity_timeout)
            .await
        {
            return Err(TrackingError::ShuttingDown);
        }

        match (snapshot.created, event.kind) {
            (true, _) => info!(
                user_id,
                book_id = book.book_id,
                kind = ?event.kind,
                start_progress = progress,
                "New session created in memory"
            ),
            (false, SyncKind::Write) => info!(
                user_id,
                book_id = book.book_id,
                progress,
                location = event.location,
                "Session updated in memory"
            ),
            (false, SyncKind::Read) => debug!(
                user_id,
                book_id = book.book_id,
                "Session kept alive"
            ),
        }
        Ok(())
    }

    /// Forces completion of every live session. Called once by the host on
    /// termination; returns after each drained record was attempted once.
    pub async fn drain(&self) -> DrainSummary {
        self.scheduler.cancel_all().await;
        if let Some(handle) = self.expiry_loop.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Expiry loop ended abnormally");
            }
        }

        let records = self.registry.drain_all().await;
        let mut summary = DrainSummary {
            drained: records.len(),
            ..DrainSummary::default()
        };
        if records.is_empty() {
            info!("Shutdown: no active sessions to flush");
        } else {
            info!(count = records.len(), "Shutdown: flushing active sessions");
        }

        for (key, record) in records {
            match self.complete(key, record, CompletionCause::Drained).await {
                Completion::Persisted(_) => summary.persisted += 1,
                Completion::Discarded(_) => summary.discarded += 1,
                Completion::Failed(_) => summary.failed += 1,
            }
        }

        // Expiries that fired before the cancel may still be writing.
        self.completions.close();
        self.completions.wait().await;

        info!(
            persisted = summary.persisted,
            discarded = summary.discarded,
            failed = summary.failed,
            "Shutdown: session flush complete"
        );
        summary
    }

    /// Number of live sessions.
    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    /// A copy of the live record for `key`, if any.
    pub async fn session(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.registry.get(key).await
    }

    /// Holds the tracker weakly, so dropping the last handle stops the loop.
    async fn run_expiry_loop(scheduler: Arc<ExpiryScheduler>, weak: Weak<Self>) {
        while let Some(due) = scheduler.next_due().await {
            let Some(tracker) = weak.upgrade() else {
                break;
            };
            for expiry in due {
                let owner = Arc::clone(&tracker);
                tracker
                    .completions
                    .spawn(async move { owner.complete_expired(expiry).await });
            }
        }
        debug!("Expiry loop stopped");
    }

    async fn complete_expired(&self, expiry: Expiry) {
        match self.registry.pop_one(&expiry.key, expiry.timer).await {
            Some(record) => {
                self.complete(expiry.key, record, CompletionCause::Expired)
                    .await;
            }
            None => debug!(key = %expiry.key, "Skipping superseded expiry"),
        }
    }

    /// The single completion path shared by expiry and drain. The record is
    /// already out of the registry and owned here.
    async fn complete(
        &self,
        key: SessionKey,
        record: SessionRecord,
        cause: CompletionCause,
    ) -> Completion {
        match self.policy.evaluate(&key, &record) {
            Eligibility::Eligible(session) => match self.sink.persist(&session).await {
                Ok(session_id) => {
                    info!(
                        session_id,
                        user_id = key.user_id,
                        book_id = key.book_id,
                        duration_secs = session.duration_seconds,
                        start_progress = session.start_progress,
                        end_progress = session.end_progress,
                        %cause,
                        "Session completed and written to DB"
                    );
                    Completion::Persisted(session_id)
                }
                Err(e) => {
                    error!(
                        error = %e,
                        user_id = key.user_id,
                        book_id = key.book_id,
                        %cause,
                        "Error writing completed session to database"
                    );
                    Completion::Failed(e)
                }
            },
            Eligibility::Ineligible(reason) => {
                debug!(
                    user_id = key.user_id,
                    book_id = key.book_id,
                    %reason,
                    %cause,
                    "Session not written to DB"
                );
                Completion::Discarded(reason)
            }
        }
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

/// Non-finite progress becomes 0; anything else is clamped into [0,1].
fn sanitize_progress(progress: f64) -> f64 {
    if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        warn!(progress, "Invalid progress value, using 0");
        0.0
    }
}
