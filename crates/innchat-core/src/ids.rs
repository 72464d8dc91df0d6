//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix carried by every locally generated message identifier.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Identifier of a message in the timeline.
///
/// Either a temporary token minted for a local echo (see [`MessageId::temporary`])
/// or a durable identifier assigned by the server. Server ids are always held
/// as strings, even when the wire carried a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new MessageId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a temporary id for a local echo.
    ///
    /// The token is time-based (`millis`) and carries a random suffix, so two
    /// echoes appended in the same millisecond never collide.
    pub fn temporary(millis: i64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}_{}", TEMP_ID_PREFIX, millis, &suffix[..12]))
    }

    /// Returns true if this id was minted locally and has not been replaced yet.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns true if this id was assigned by the server.
    pub fn is_durable(&self) -> bool {
        !self.is_temporary()
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Visitor session identifier, stable per visitor per site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random SessionId stamped with its creation time.
    pub fn generate(created_at_ms: i64) -> Self {
        Self(format!("sess_{}_{}", Uuid::new_v4().simple(), created_at_ms))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Server-assigned conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Create a new ConversationId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Tenant key namespacing everything a deployed site persists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteKey(String);

impl SiteKey {
    /// Create a new SiteKey from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key for an entry scoped to this site.
    pub fn scoped(&self, entry: &str) -> String {
        format!("innchat:{}:{}", self.0, entry)
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SiteKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
