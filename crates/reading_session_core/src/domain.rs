//! crates/reading_session_core/src/domain.rs
//!
//! Defines the pure, core data structures for session tracking.
//! These structs are independent of any database, HTTP or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;

/// Internal identifier of a KoSync user.
pub type UserId = i64;

/// Internal identifier of a book.
pub type BookId = i64;

/// Identifier assigned by the storage sink to a persisted session.
pub type SessionId = u64;

/// Composite key of one trackable reading activity: (user, book).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub user_id: UserId,
    pub book_id: BookId,
}

impl SessionKey {
    pub fn new(user_id: UserId, book_id: BookId) -> Self {
        Self { user_id, book_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={}, book={}", self.user_id, self.book_id)
    }
}

/// The kind of sync call that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// The client fetched its stored progress (`GET /syncs/progress/{document}`).
    Read,
    /// The client pushed new progress (`PUT /syncs/progress`).
    Write,
}

/// What the identity resolver knows about a content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookIdentity {
    pub book_id: BookId,
    pub book_type: String,
}

/// Identifies one armed expiry timer.
///
/// A record remembers the handle of its latest arming; an expiry carrying any
/// other handle is stale and must not complete the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// The live, mutable accumulator for one session key.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub start_time: DateTime<Utc>,
    pub start_progress: f64,
    pub current_progress: f64,
    pub start_location: String,
    pub current_location: String,
    pub book_type: String,
    /// Time of the most recent write; the session's effective end.
    pub last_update: DateTime<Utc>,
    pub pending_timer: TimerHandle,
}

impl SessionRecord {
    pub fn new(
        progress: f64,
        location: &str,
        book_type: &str,
        now: DateTime<Utc>,
        timer: TimerHandle,
    ) -> Self {
        Self {
            start_time: now,
            start_progress: progress,
            current_progress: progress,
            start_location: location.to_string(),
            current_location: location.to_string(),
            book_type: book_type.to_string(),
            last_update: now,
            pending_timer: timer,
        }
    }
}

/// A finished session ready to be handed to the storage sink.
///
/// Progress values are percentages rounded to the configured precision.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSession {
    pub user_id: UserId,
    pub book_id: BookId,
    pub book_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub start_progress: f64,
    pub end_progress: f64,
    pub progress_delta: f64,
    pub start_location: String,
    pub end_location: String,
}
