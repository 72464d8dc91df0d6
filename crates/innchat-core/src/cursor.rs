//! The "since" watermark for polling.

use chrono::{DateTime, Duration, Utc};

use crate::Message;

/// Highest confirmed server timestamp seen so far.
///
/// Only moves forward. Queries subtract `slack` so a small overlap of
/// already-seen records is re-fetched each cycle; the reconciler absorbs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    position: DateTime<Utc>,
    slack: Duration,
}

impl Cursor {
    /// Start a fresh cursor at `now`.
    pub fn starting_at(now: DateTime<Utc>, slack: Duration) -> Self {
        Self {
            position: now,
            slack,
        }
    }

    /// Current watermark.
    pub fn position(&self) -> DateTime<Utc> {
        self.position
    }

    /// Move forward to the newest of `confirmed`. Returns true if it moved.
    pub fn advance(&mut self, confirmed: &[DateTime<Utc>]) -> bool {
        match confirmed.iter().max() {
            Some(&newest) if newest > self.position => {
                self.position = newest;
                true
            }
            _ => false,
        }
    }

    /// Advance from a merged batch, skipping anything that is still an echo.
    pub fn advance_from(&mut self, batch: &[Message]) -> bool {
        let confirmed: Vec<DateTime<Utc>> = batch
            .iter()
            .filter(|m| !m.is_echo())
            .map(|m| m.timestamp)
            .collect();
        self.advance(&confirmed)
    }

    /// Lower bound for the next fetch.
    pub fn since_param(&self) -> DateTime<Utc> {
        self.position - self.slack
    }
}
