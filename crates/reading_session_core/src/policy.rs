//! crates/reading_session_core/src/policy.rs
//!
//! Decides whether a finished session is worth persisting and derives the
//! fields that are stored with it.

use std::fmt;

use crate::domain::{CompletedSession, SessionKey, SessionRecord};

/// Finest precision applied to persisted percentages. Larger settings are capped.
pub const MAX_DECIMAL_PLACES: u32 = 10;

/// Why a session was not persisted. Both conditions may hold at once.
#[derive(Debug, Clone, PartialEq)]
pub struct IneligibleReason {
    /// Set when the session lasted less than the minimum, in seconds.
    pub too_short: Option<f64>,
    /// Set when progress did not move; holds the unchanged fraction.
    pub no_movement: Option<f64>,
    pub min_duration_seconds: u64,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(duration) = self.too_short {
            parts.push(format!(
                "duration {duration}s < {}s",
                self.min_duration_seconds
            ));
        }
        if let Some(progress) = self.no_movement {
            parts.push(format!("no position change ({:.1}%)", progress * 100.0));
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible(CompletedSession),
    Ineligible(IneligibleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistencePolicy {
    pub min_duration_seconds: u64,
    pub decimal_places: u32,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            min_duration_seconds: 10,
            decimal_places: 1,
        }
    }
}

impl PersistencePolicy {
    pub fn new(min_duration_seconds: u64, decimal_places: u32) -> Self {
        Self {
            min_duration_seconds,
            decimal_places,
        }
    }

    /// Tests a record that has left the registry. Its effective end is
    /// `last_update`, not the moment it is evaluated.
    pub fn evaluate(&self, key: &SessionKey, record: &SessionRecord) -> Eligibility {
        let elapsed = record.last_update - record.start_time;
        let duration = elapsed.num_milliseconds() as f64 / 1000.0;
        let movement = record.current_progress - record.start_progress;

        let too_short = duration < self.min_duration_seconds as f64;
        let no_movement = movement == 0.0;

        if too_short || no_movement {
            return Eligibility::Ineligible(IneligibleReason {
                too_short: too_short.then_some(duration),
                no_movement: no_movement.then_some(record.start_progress),
                min_duration_seconds: self.min_duration_seconds,
            });
        }

        let start_progress = self.to_percentage(record.start_progress);
        let end_progress = self.to_percentage(record.current_progress);

        Eligibility::Eligible(CompletedSession {
            user_id: key.user_id,
            book_id: key.book_id,
            book_type: record.book_type.clone(),
            start_time: record.start_time,
            end_time: record.last_update,
            duration_seconds: elapsed.num_seconds(),
            start_progress,
            end_progress,
            progress_delta: self.round(end_progress - start_progress),
            start_location: record.start_location.clone(),
            end_location: record.current_location.clone(),
        })
    }

    /// Converts a [0,1] fraction into a rounded percentage.
    pub fn to_percentage(&self, fraction: f64) -> f64 {
        self.round(fraction * 100.0)
    }

    fn round(&self, value: f64) -> f64 {
        let places = self.decimal_places.min(MAX_DECIMAL_PLACES);
        let scale = 10f64.powi(places as i32);
        (value * scale).round() / scale
    }
}
