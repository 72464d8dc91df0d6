//! REST transport for the InnChat widget.
//!
//! Provides the [`Transport`] seam the widget talks through, an HTTP
//! implementation of it, and the wire types that normalize loose server
//! payloads into strict [`innchat_core::Message`]s.

pub mod error;
pub mod http;
pub mod transport;
pub mod wire;

pub use error::ClientError;
pub use http::HttpClient;
pub use transport::Transport;
pub use wire::{FetchQuery, OutboundMessage, RawMessage, SendReceipt};
