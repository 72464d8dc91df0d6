//! InnChat Core Domain Types
//!
//! This crate contains the chat widget's synchronization logic with no
//! dependencies on:
//! - Network/HTTP
//! - Durable storage
//! - Runtime specifics
//!
//! Every function here takes the current time as an argument, so the whole
//! merge/cursor/lifecycle model can be driven deterministically in tests.

pub mod cursor;
pub mod error;
pub mod guard;
pub mod ids;
pub mod lifecycle;
pub mod message;
pub mod reconcile;
pub mod status;
pub mod timeline;

// Re-export commonly used types
pub use cursor::Cursor;
pub use error::CoreError;
pub use guard::SendGuard;
pub use ids::{ConversationId, MessageId, SessionId, SiteKey};
pub use lifecycle::{LeadCapture, LeadForm, LeadInfo, Lifecycle, WidgetState};
pub use message::Message;
pub use reconcile::{reconcile, ReconcileOptions};
pub use status::{DeliveryStatus, Direction};
pub use timeline::{MergeSummary, Timeline};
