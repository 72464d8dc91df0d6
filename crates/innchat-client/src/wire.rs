//! Wire formats for the widget REST API.
//!
//! Server payloads are loose: optional fields, camelCase mixed with
//! snake_case, numeric or string ids. Everything is normalized here into the
//! strict [`Message`] shape before it reaches the reconciler.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{trace, warn};

use innchat_core::{ConversationId, DeliveryStatus, Direction, Message, MessageId, SessionId};

use crate::error::ClientError;

/// `messageType` value the server uses for the closing notice.
pub const CLOSED_MESSAGE_TYPE: &str = "conversation_closed";

/// Body of `POST /widget/message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub message: String,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub client_message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

/// Response of `POST /widget/message`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct SendReceipt {
    pub conversation: Option<Value>,
    pub message: Option<Value>,
}

impl From<Map<String, Value>> for SendReceipt {
    fn from(mut map: Map<String, Value>) -> Self {
        Self {
            conversation: take_first(&mut map, &["conversationId", "conversation_id"]),
            message: take_first(&mut map, &["messageId", "message_id", "id"]),
        }
    }
}

impl SendReceipt {
    /// Conversation the server filed this message under, if it said.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation
            .as_ref()
            .and_then(id_to_string)
            .map(|id| ConversationId::new(id.into_inner()))
    }

    /// Durable id the server assigned, if it said.
    pub fn message_id(&self) -> Option<MessageId> {
        self.message.as_ref().and_then(id_to_string)
    }
}

/// Parameters of `GET /widget/session/{sessionId}/messages`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub session_id: SessionId,
    pub conversation_id: Option<ConversationId>,
    pub since: DateTime<Utc>,
}

/// A message record as the server sends it.
///
/// Field names vary between deployments and some send several spellings of
/// the same field at once, so each field takes the first non-null key found.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct RawMessage {
    pub id: Option<Value>,
    pub body: Option<String>,
    pub is_from_customer: Option<bool>,
    pub timestamp: Option<Value>,
    pub status: Option<String>,
    pub agent_name: Option<String>,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub message_type: Option<String>,
    pub conversation_closed: Option<bool>,
}

impl From<Map<String, Value>> for RawMessage {
    fn from(mut map: Map<String, Value>) -> Self {
        let map = &mut map;
        Self {
            id: take_first(map, &["id", "_id", "messageId", "message_id"]),
            body: take_string(map, &["body", "message", "content"]),
            is_from_customer: take_bool(
                map,
                &["isFromCustomer", "is_from_customer", "fromCustomer", "isCustomer"],
            ),
            timestamp: take_first(map, &["timestamp", "createdAt", "created_at"]),
            status: take_string(map, &["status"]),
            agent_name: take_string(map, &["agentName", "agent_name"]),
            media_type: take_string(map, &["mediaType", "media_type"]),
            media_url: take_string(map, &["mediaUrl", "media_url"]),
            message_type: take_string(map, &["messageType", "message_type"]),
            conversation_closed: take_bool(map, &["conversationClosed", "conversation_closed"]),
        }
    }
}

fn take_first(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| map.remove(*key).filter(|value| !value.is_null()))
}

fn take_string(map: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    match take_first(map, keys)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn take_bool(map: &mut Map<String, Value>, keys: &[&str]) -> Option<bool> {
    take_first(map, keys)?.as_bool()
}

impl RawMessage {
    /// Normalize into a strict [`Message`], rejecting records missing required fields.
    pub fn into_message(self) -> Result<Message, ClientError> {
        let id = self
            .id
            .as_ref()
            .and_then(id_to_string)
            .ok_or_else(|| ClientError::MalformedRecord("missing id".to_string()))?;
        let direction = self
            .is_from_customer
            .map(Direction::from_visitor_flag)
            .ok_or_else(|| ClientError::MalformedRecord(format!("{}: missing direction", id)))?;
        let timestamp = self
            .timestamp
            .as_ref()
            .and_then(parse_timestamp)
            .ok_or_else(|| ClientError::MalformedRecord(format!("{}: bad timestamp", id)))?;

        let body = self.body.unwrap_or_default();
        let media_url = self.media_url.filter(|url| !url.trim().is_empty());
        if body.trim().is_empty() && media_url.is_none() {
            return Err(ClientError::MalformedRecord(format!("{}: no content", id)));
        }

        let closes = self.conversation_closed.unwrap_or(false)
            || self
                .message_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(CLOSED_MESSAGE_TYPE));

        let status = self
            .status
            .as_deref()
            .and_then(DeliveryStatus::parse_loose)
            .unwrap_or(DeliveryStatus::Sent);

        let mut message = Message::confirmed(id, body, direction, timestamp).with_status(status);
        message.agent_name = self.agent_name;
        message.media_url = media_url;
        message.media_type = self.media_type;
        message.closes_conversation = closes;
        Ok(message)
    }
}

fn id_to_string(value: &Value) -> Option<MessageId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(MessageId::new(s.trim())),
        Value::Number(n) => Some(MessageId::new(n.to_string())),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Decode a fetch response body: a bare array or `{ "messages": [...] }`.
///
/// Malformed records are dropped individually; the rest of the batch survives.
pub fn decode_batch(payload: Value) -> Result<Vec<Message>, ClientError> {
    let records = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("messages").or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ClientError::Serialization(
                    "expected an array of messages".to_string(),
                ))
            }
        },
        _ => {
            return Err(ClientError::Serialization(
                "expected an array of messages".to_string(),
            ))
        }
    };

    let total = records.len();
    let messages: Vec<Message> = records
        .into_iter()
        .filter_map(|record| {
            let decoded = serde_json::from_value::<RawMessage>(record)
                .map_err(|e| ClientError::Serialization(e.to_string()))
                .and_then(RawMessage::into_message);
            match decoded {
                Ok(message) => {
                    trace!(id = %message.id, "Decoded record");
                    Some(message)
                }
                Err(e) => {
                    warn!(error = %e, "Dropping server record");
                    None
                }
            }
        })
        .collect();

    if messages.len() < total {
        warn!(kept = messages.len(), total, "Batch contained malformed records");
    }
    Ok(messages)
}
