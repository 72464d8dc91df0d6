//! Messages between the widget task and its callers.

use tokio::sync::oneshot;

use innchat_core::{ConversationId, LeadForm, Message, SessionId, WidgetState};

use crate::error::WidgetError;

/// Reply channel for a command.
pub type Reply<T> = oneshot::Sender<Result<T, WidgetError>>;

/// Events sent from the widget task to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    /// Lifecycle state changed.
    StateChanged(WidgetState),

    /// The rendered timeline changed; carries the full new timeline.
    TimelineUpdated(Vec<Message>),

    /// The backend assigned (or reassigned) the conversation.
    ConversationAssigned(ConversationId),
}

/// Commands sent from the host page to the widget task.
#[derive(Debug)]
pub enum WidgetCommand {
    /// Open the chat surface (may land on the lead form).
    Open { reply: Reply<WidgetState> },

    /// Collapse the chat surface back to the launcher.
    Collapse { reply: Reply<WidgetState> },

    /// Submit the lead form.
    SubmitLead {
        form: LeadForm,
        reply: Reply<WidgetState>,
    },

    /// Send a text message.
    Send { body: String, reply: Reply<Message> },

    /// Send a media message with an optional caption.
    SendMedia {
        url: String,
        media_type: Option<String>,
        caption: Option<String>,
        reply: Reply<Message>,
    },

    /// Read the current state.
    Snapshot { reply: Reply<WidgetSnapshot> },

    /// Stop polling and end the task.
    Shutdown,
}

/// Point-in-time view of the widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSnapshot {
    pub state: WidgetState,
    pub timeline: Vec<Message>,
    pub session_id: SessionId,
    pub conversation_id: Option<ConversationId>,
}
