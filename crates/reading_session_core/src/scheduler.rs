//! crates/reading_session_core/src/scheduler.rs
//!
//! Per-key inactivity timers, kept as a single min-ordered set of deadlines
//! instead of one timer task per key.
//!
//! Re-arming a key pushes a new deadline carrying a new `TimerHandle` and
//! records that handle as the key's latest. The old deadline stays in the heap
//! until it comes due or the heap is compacted, and is skipped either way.
//! Consumers still check the handle against the record before acting (see
//! `SessionRegistry::pop_one`).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::{SessionKey, TimerHandle};

/// Heap size below which superseded entries are left alone.
const COMPACT_THRESHOLD: usize = 64;

/// A deadline that has come due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Expiry {
    pub deadline: Instant,
    pub timer: TimerHandle,
    pub key: SessionKey,
}

#[derive(Default)]
struct Deadlines {
    heap: BinaryHeap<Reverse<Expiry>>,
    /// The handle most recently armed for each key.
    latest: HashMap<SessionKey, TimerHandle>,
}

impl Deadlines {
    fn is_latest(&self, expiry: &Expiry) -> bool {
        self.latest.get(&expiry.key) == Some(&expiry.timer)
    }

    /// Drops superseded entries once they outnumber the live ones.
    fn compact(&mut self) {
        if self.heap.len() > COMPACT_THRESHOLD && self.heap.len() > 2 * self.latest.len() {
            let latest = &self.latest;
            self.heap
                .retain(|Reverse(expiry)| latest.get(&expiry.key) == Some(&expiry.timer));
        }
    }
}

pub struct ExpiryScheduler {
    deadlines: Mutex<Deadlines>,
    wakeup: Notify,
    cancelled: CancellationToken,
}

impl Default for ExpiryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self {
            deadlines: Mutex::new(Deadlines::default()),
            wakeup: Notify::new(),
            cancelled: CancellationToken::new(),
        }
    }

    /// Schedules `key` to expire `delay` from now under handle `timer`,
    /// superseding any earlier arming of the same key.
    ///
    /// The heap holds at most about twice the number of armed keys, plus a
    /// small constant, however often keys are re-armed.
    ///
    /// Returns `false` once the scheduler is stopped; nothing is armed after that.
    pub async fn arm(&self, key: SessionKey, timer: TimerHandle, delay: Duration) -> bool {
        if self.cancelled.is_cancelled() {
            return false;
        }
        let expiry = Expiry {
            deadline: Instant::now() + delay,
            timer,
            key,
        };
        {
            let mut deadlines = self.deadlines.lock().await;
            deadlines.latest.insert(key, timer);
            deadlines.heap.push(Reverse(expiry));
            deadlines.compact();
        }
        // A stored permit covers the case where the loop is not parked yet.
        self.wakeup.notify_one();
        true
    }

    /// Drops every outstanding deadline and stops the expiry loop for good.
    pub async fn cancel_all(&self) {
        self.stop();
        let mut deadlines = self.deadlines.lock().await;
        deadlines.heap.clear();
        deadlines.latest.clear();
    }

    /// Stops the expiry loop without touching the heap. Usable from `Drop`.
    pub fn stop(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Number of deadlines in the heap, superseded ones included.
    pub async fn pending(&self) -> usize {
        self.deadlines.lock().await.heap.len()
    }

    /// Waits until at least one live deadline is due and returns all due
    /// entries in deadline order. Superseded entries are discarded on the way.
    /// Returns `None` once the scheduler has been stopped.
    pub async fn next_due(&self) -> Option<Vec<Expiry>> {
        loop {
            if self.cancelled.is_cancelled() {
                return None;
            }

            let next_deadline = {
                let mut deadlines = self.deadlines.lock().await;
                let now = Instant::now();
                let mut due = Vec::new();
                while deadlines
                    .heap
                    .peek()
                    .is_some_and(|Reverse(expiry)| expiry.deadline <= now)
                {
                    if let Some(Reverse(expiry)) = deadlines.heap.pop() {
                        if deadlines.is_latest(&expiry) {
                            deadlines.latest.remove(&expiry.key);
                            due.push(expiry);
                        }
                    }
                }
                if !due.is_empty() {
                    return Some(due);
                }
                deadlines.heap.peek().map(|Reverse(expiry)| expiry.deadline)
            };

            let sleep = async {
                match next_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.cancelled.cancelled() => return None,
                _ = self.wakeup.notified() => {}
                _ = sleep => {}
            }
        }
    }
}
