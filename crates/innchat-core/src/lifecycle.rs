//! Widget lifecycle state machine and lead capture.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::CoreError;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

/// Visible state of the chat widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetState {
    /// Mounted but not shown yet.
    #[default]
    Hidden,
    /// Launcher shown, chat surface collapsed.
    Visible,
    /// Lead form shown before chatting.
    Gated,
    /// Chat surface open and polling.
    Active,
    /// Conversation closed by an agent. Terminal.
    Closed,
}

impl WidgetState {
    /// Returns true for the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for WidgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hidden => "hidden",
            Self::Visible => "visible",
            Self::Gated => "gated",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which visitor details a deployment requires before chatting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCapture {
    #[default]
    None,
    Name,
    Email,
    NameAndEmail,
}

impl LeadCapture {
    /// Returns true if the gate form must be shown.
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::None)
    }

    fn needs_name(&self) -> bool {
        matches!(self, Self::Name | Self::NameAndEmail)
    }

    fn needs_email(&self) -> bool {
        matches!(self, Self::Email | Self::NameAndEmail)
    }
}

/// Raw lead form input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadForm {
    pub name: String,
    pub email: String,
}

/// Validated visitor details, attached to outbound messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadInfo {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl LeadForm {
    /// Create a form from raw input.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Validate against the requirement. Optional fields are kept when filled in.
    pub fn validate(&self, capture: LeadCapture) -> Result<LeadInfo, CoreError> {
        let name = self.name.trim();
        let email = self.email.trim();

        if capture.needs_name() && name.is_empty() {
            return Err(CoreError::InvalidInput("name is required".to_string()));
        }
        if capture.needs_email() && email.is_empty() {
            return Err(CoreError::InvalidInput("email is required".to_string()));
        }
        if !email.is_empty() && !EMAIL_PATTERN.is_match(email) {
            return Err(CoreError::InvalidInput(format!(
                "'{}' is not a valid email address",
                email
            )));
        }

        Ok(LeadInfo {
            name: (!name.is_empty()).then(|| name.to_string()),
            email: (!email.is_empty()).then(|| email.to_string()),
        })
    }
}

/// Lifecycle state machine.
///
/// `Hidden -> Visible -> [Gated] -> Active -> Closed`, with `Active` and
/// `Gated` collapsing back to `Visible`. `Closed` never reverts.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: WidgetState,
    capture: LeadCapture,
    lead: Option<LeadInfo>,
}

impl Lifecycle {
    /// Create a hidden widget with the given gate requirement.
    pub fn new(capture: LeadCapture) -> Self {
        Self {
            state: WidgetState::Hidden,
            capture,
            lead: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> WidgetState {
        self.state
    }

    /// Captured lead details, if any.
    pub fn lead(&self) -> Option<&LeadInfo> {
        self.lead.as_ref()
    }

    /// Visitor input is accepted only while the chat surface is open.
    pub fn is_input_enabled(&self) -> bool {
        self.state == WidgetState::Active
    }

    /// The poller runs only while the chat surface is open.
    pub fn should_poll(&self) -> bool {
        self.state == WidgetState::Active
    }

    /// Show the launcher after the mount delay.
    pub fn reveal(&mut self) -> Result<WidgetState, CoreError> {
        match self.state {
            WidgetState::Hidden => self.transition(WidgetState::Visible),
            other => Err(invalid(other, WidgetState::Visible)),
        }
    }

    /// Open the chat surface, going through the gate form when required.
    pub fn open(&mut self) -> Result<WidgetState, CoreError> {
        match self.state {
            WidgetState::Visible if self.capture.is_required() && self.lead.is_none() => {
                self.transition(WidgetState::Gated)
            }
            WidgetState::Visible => self.transition(WidgetState::Active),
            WidgetState::Active | WidgetState::Gated => Ok(self.state),
            other => Err(invalid(other, WidgetState::Active)),
        }
    }

    /// Submit the gate form. Stays `Gated` on validation failure.
    pub fn submit_lead(&mut self, form: &LeadForm) -> Result<WidgetState, CoreError> {
        if self.state != WidgetState::Gated {
            return Err(invalid(self.state, WidgetState::Active));
        }
        let lead = form.validate(self.capture)?;
        self.lead = Some(lead);
        self.transition(WidgetState::Active)
    }

    /// Collapse the chat surface, keeping history and identity.
    pub fn collapse(&mut self) -> Result<WidgetState, CoreError> {
        match self.state {
            WidgetState::Active | WidgetState::Gated => self.transition(WidgetState::Visible),
            WidgetState::Visible => Ok(self.state),
            other => Err(invalid(other, WidgetState::Visible)),
        }
    }

    /// An agent closed the conversation.
    pub fn close_conversation(&mut self) -> Result<WidgetState, CoreError> {
        match self.state {
            WidgetState::Closed => Ok(self.state),
            WidgetState::Hidden => Err(invalid(self.state, WidgetState::Closed)),
            _ => self.transition(WidgetState::Closed),
        }
    }

    fn transition(&mut self, to: WidgetState) -> Result<WidgetState, CoreError> {
        self.state = to;
        Ok(to)
    }
}

fn invalid(from: WidgetState, to: WidgetState) -> CoreError {
    CoreError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
