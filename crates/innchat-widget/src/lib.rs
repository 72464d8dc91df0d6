//! InnChat Widget
//!
//! Runs one embedded chat session: visitor identity, the poll loop, optimistic
//! sends and the open/gated/closed lifecycle. Rendering is left to the host,
//! which consumes [`WidgetEvent`]s.

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod poller;
pub mod widget;

pub use config::WidgetConfig;
pub use error::{StorageError, WidgetError};
pub use event::{WidgetEvent, WidgetSnapshot};
pub use identity::{FileStorage, IdentityStore, MemoryStorage, Storage};
pub use poller::Poller;
pub use widget::{ChatWidget, WidgetHandle};
