//! Delivery status and message direction.

use serde::{Deserialize, Serialize};

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Echo appended locally, request not yet acknowledged.
    #[default]
    Sending,
    /// Accepted by the server.
    Sent,
    /// Delivered to the other party.
    Delivered,
    /// Seen by the other party.
    Read,
    /// Send request failed. Terminal, outside the confidence ordering.
    Failed,
}

impl DeliveryStatus {
    /// Confidence rank used when two entries compete for the same slot.
    ///
    /// `Failed` ranks with `Sending`: neither says anything about the server.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Read => 3,
            Self::Delivered => 2,
            Self::Sent => 1,
            Self::Sending | Self::Failed => 0,
        }
    }

    /// Returns true for the terminal error state.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Parse a loosely formatted status string, case-insensitively.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sending" | "pending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" | "seen" => Some(Self::Read),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the site visitor.
    Visitor,
    /// Written by an agent or generated by the system.
    Agent,
}

impl Direction {
    /// Map the server's boolean "authored by the customer" flag.
    pub fn from_visitor_flag(is_visitor: bool) -> Self {
        if is_visitor {
            Self::Visitor
        } else {
            Self::Agent
        }
    }

    /// Returns true if the visitor authored the message.
    pub fn is_visitor(&self) -> bool {
        matches!(self, Self::Visitor)
    }
}
