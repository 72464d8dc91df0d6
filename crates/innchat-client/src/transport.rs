//! Transport seam between the widget and the chat backend.

use async_trait::async_trait;

use innchat_core::Message;

use crate::error::ClientError;
use crate::wire::{FetchQuery, OutboundMessage, SendReceipt};

/// How the widget exchanges messages with the backend.
///
/// The widget only needs these two calls, so a push-based backend can
/// implement `fetch_messages` by draining whatever it has buffered.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit one visitor message.
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, ClientError>;

    /// Fetch every confirmed message newer than `query.since`, already normalized.
    async fn fetch_messages(&self, query: &FetchQuery) -> Result<Vec<Message>, ClientError>;
}
