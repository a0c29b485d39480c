//! crates/reading_session_core/src/registry.rs
//!
//! The authoritative in-memory map from session key to live record.
//!
//! Every operation runs inside one exclusive section and does no I/O, so the
//! lock is held only for an O(1) map mutation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::{SessionKey, SessionRecord, SyncKind, TimerHandle};

/// What the caller needs after an upsert in order to (re)arm the expiry timer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    /// The handle the new timer must carry. Any earlier handle is now stale.
    pub timer: TimerHandle,
    pub created: bool,
    pub current_progress: f64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<SessionKey, SessionRecord>,
    next_timer: u64,
    /// Set by `drain_all`; no record is created or updated afterwards.
    closed: bool,
}

impl Inner {
    fn issue_timer(&mut self) -> TimerHandle {
        self.next_timer += 1;
        TimerHandle(self.next_timer)
    }
}

/// The session registry. Construct once and share by reference.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record for `key` if absent, otherwise applies the event to it.
    ///
    /// A write overwrites the current progress, location and `last_update`.
    /// A read only refreshes the timer handle of an existing record.
    ///
    /// Returns `None` once the registry has been drained.
    pub async fn record_event(
        &self,
        key: SessionKey,
        kind: SyncKind,
        progress: f64,
        location: &str,
        book_type: &str,
        now: DateTime<Utc>,
    ) -> Option<RecordSnapshot> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.closed {
            return None;
        }
        let timer = inner.issue_timer();

        match inner.records.get_mut(&key) {
            Some(record) => {
                if kind == SyncKind::Write {
                    record.current_progress = progress;
                    record.current_location = location.to_string();
                    // Out-of-order deliveries must not move the end before the start.
                    record.last_update = record.last_update.max(now);
                }
                record.pending_timer = timer;
                Some(RecordSnapshot {
                    timer,
                    created: false,
                    current_progress: record.current_progress,
                })
            }
            None => {
                inner
                    .records
                    .insert(key, SessionRecord::new(progress, location, book_type, now, timer));
                Some(RecordSnapshot {
                    timer,
                    created: true,
                    current_progress: progress,
                })
            }
        }
    }

    /// Removes and returns the record for `key`, but only while `timer` is still
    /// its armed handle. A stale expiry therefore never takes a newer record.
    pub async fn pop_one(&self, key: &SessionKey, timer: TimerHandle) -> Option<SessionRecord> {
        let mut inner = self.inner.lock().await;
        let armed = inner
            .records
            .get(key)
            .is_some_and(|record| record.pending_timer == timer);
        if armed {
            inner.records.remove(key)
        } else {
            None
        }
    }

    /// Removes and returns every live record, leaving the registry empty and
    /// closed to further events.
    pub async fn drain_all(&self) -> Vec<(SessionKey, SessionRecord)> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.records.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// A copy of the live record for `key`, if any.
    pub async fn get(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.inner.lock().await.records.get(key).cloned()
    }
}
