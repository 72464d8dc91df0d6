//! Widget configuration.

use std::time::Duration;

use innchat_core::{LeadCapture, ReconcileOptions, SiteKey};

/// Widget configuration.
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// REST origin of the chat backend.
    pub base_url: String,

    /// Tenant key namespacing persisted identity.
    pub site_key: SiteKey,

    /// Period between polls while the chat surface is open.
    pub poll_interval: Duration,

    /// Backward overlap subtracted from the cursor on each fetch.
    pub cursor_slack: Duration,

    /// Width of the time bucket used to collapse duplicates.
    pub dedup_bucket: Duration,

    /// Window in which identical text cannot be sent twice.
    pub send_cooldown: Duration,

    /// Delay from mount until the launcher is shown.
    pub visible_delay: Duration,

    /// Open the chat surface this long after the launcher shows.
    pub auto_open_delay: Option<Duration>,

    /// Visitor details required before chatting.
    pub lead_capture: LeadCapture,

    /// Capacity of the widget event channel.
    pub event_buffer: usize,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            site_key: SiteKey::new("default"),
            poll_interval: Duration::from_secs(3),
            cursor_slack: Duration::from_secs(30),
            dedup_bucket: Duration::from_secs(5),
            send_cooldown: Duration::from_secs(3),
            visible_delay: Duration::ZERO,
            auto_open_delay: None,
            lead_capture: LeadCapture::None,
            event_buffer: 64,
        }
    }
}

impl WidgetConfig {
    /// Reconciler options derived from this config.
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions::with_bucket(to_chrono(self.dedup_bucket))
    }

    /// Cursor slack as a signed duration.
    pub fn slack(&self) -> chrono::Duration {
        to_chrono(self.cursor_slack)
    }

    /// Send cool-down as a signed duration.
    pub fn cooldown(&self) -> chrono::Duration {
        to_chrono(self.send_cooldown)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_constants() {
        let config = WidgetConfig::default();
        assert_eq!(config.slack(), chrono::Duration::seconds(30));
        assert_eq!(
            config.reconcile_options().bucket,
            chrono::Duration::seconds(5)
        );
    }
}
