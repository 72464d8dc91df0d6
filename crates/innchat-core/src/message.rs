//! Chat message types for the widget timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeliveryStatus, Direction, MessageId};

/// A message in the widget timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Temporary token for local echoes, durable id once confirmed.
    pub id: MessageId,
    /// Text content. May be empty for media-only messages.
    pub body: String,
    /// Who authored the message. Never changes once set.
    pub direction: Direction,
    /// Local append time for echoes, server time for confirmed records.
    pub timestamp: DateTime<Utc>,
    /// Delivery status.
    pub status: DeliveryStatus,
    /// Display name of the agent who replied.
    pub agent_name: Option<String>,
    /// MIME-ish media kind (`image`, `file`, ...).
    pub media_type: Option<String>,
    /// Location of attached media.
    pub media_url: Option<String>,
    /// Set on the record the server emits when an agent closes the conversation.
    pub closes_conversation: bool,
}

impl Message {
    /// Create a confirmed message as received from the server.
    pub fn confirmed(
        id: impl Into<MessageId>,
        body: impl Into<String>,
        direction: Direction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            direction,
            timestamp,
            status: DeliveryStatus::Sent,
            agent_name: None,
            media_type: None,
            media_url: None,
            closes_conversation: false,
        }
    }

    /// Create a local echo of visitor input.
    pub fn echo(body: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::temporary(now.timestamp_millis()),
            body: body.into(),
            direction: Direction::Visitor,
            timestamp: now,
            status: DeliveryStatus::Sending,
            agent_name: None,
            media_type: None,
            media_url: None,
            closes_conversation: false,
        }
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder method to set the agent name.
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Builder method to attach media.
    pub fn with_media(mut self, url: impl Into<String>, media_type: Option<String>) -> Self {
        self.media_url = Some(url.into());
        self.media_type = media_type;
        self
    }

    /// Builder method to mark this record as the conversation-closed signal.
    pub fn closing(mut self) -> Self {
        self.closes_conversation = true;
        self
    }

    /// Returns true while this is an unconfirmed local echo.
    pub fn is_echo(&self) -> bool {
        self.id.is_temporary()
    }

    /// Returns true if this message carries media.
    pub fn has_media(&self) -> bool {
        self.media_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_defaults() {
        let now = Utc::now();
        let msg = Message::echo("Hello", now);
        assert!(msg.is_echo());
        assert_eq!(msg.direction, Direction::Visitor);
        assert_eq!(msg.status, DeliveryStatus::Sending);
        assert_eq!(msg.timestamp, now);
    }

    #[test]
    fn test_confirmed_builder() {
        let msg = Message::confirmed("77", "", Direction::Agent, Utc::now())
            .with_agent_name("Maria")
            .with_media("https://cdn.example/room.jpg", Some("image".to_string()))
            .with_status(DeliveryStatus::Delivered);
        assert!(!msg.is_echo());
        assert!(msg.has_media());
        assert_eq!(msg.agent_name.as_deref(), Some("Maria"));
        assert_eq!(msg.status, DeliveryStatus::Delivered);
    }
}
