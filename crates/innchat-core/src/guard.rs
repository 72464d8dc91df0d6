//! Suppression of accidental double sends.

use chrono::{DateTime, Duration, Utc};

use crate::reconcile::normalize_body;
use crate::CoreError;

/// Rejects a send whose content matches one issued within the cool-down.
#[derive(Debug, Clone)]
pub struct SendGuard {
    cooldown: Duration,
    recent: Vec<(String, DateTime<Utc>)>,
}

impl SendGuard {
    /// Create a guard with the given cool-down window.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            recent: Vec::new(),
        }
    }

    /// Check `content` against recent sends and remember it if accepted.
    pub fn check_and_record(&mut self, content: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let normalized = normalize_body(content);
        if normalized.is_empty() {
            return Err(CoreError::InvalidInput("message is empty".to_string()));
        }

        let cooldown = self.cooldown;
        self.recent.retain(|(_, sent_at)| now - *sent_at < cooldown);

        if let Some((_, sent_at)) = self.recent.iter().find(|(text, _)| *text == normalized) {
            let retry_in = cooldown - (now - *sent_at);
            return Err(CoreError::DuplicateSend {
                retry_in_ms: retry_in.num_milliseconds(),
            });
        }

        self.recent.push((normalized, now));
        Ok(())
    }
}
