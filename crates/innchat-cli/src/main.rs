//! InnChat CLI - talk to the widget backend from a terminal.
//!
//! Lines read from stdin are sent as visitor messages; the timeline is printed
//! as it changes. Logs go to stderr so they do not mix with the conversation.

use std::collections::HashSet;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use innchat_client::HttpClient;
use innchat_core::{Direction, LeadCapture, LeadForm, Message, SiteKey, WidgetState};
use innchat_widget::{ChatWidget, FileStorage, WidgetConfig, WidgetEvent};

/// Lead details required before chatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Require {
    None,
    Name,
    Email,
    NameAndEmail,
}

impl From<Require> for LeadCapture {
    fn from(value: Require) -> Self {
        match value {
            Require::None => LeadCapture::None,
            Require::Name => LeadCapture::Name,
            Require::Email => LeadCapture::Email,
            Require::NameAndEmail => LeadCapture::NameAndEmail,
        }
    }
}

/// InnChat CLI - chat with a property's front desk
#[derive(Parser)]
#[command(name = "innchat")]
#[command(about = "Terminal client for the InnChat widget backend", long_about = None)]
#[command(version)]
struct Cli {
    /// REST origin of the chat backend
    #[arg(long, default_value = "http://localhost:3000/api")]
    base_url: String,

    /// Site key namespacing the stored identity
    #[arg(long, default_value = "default")]
    site_key: String,

    /// Poll period in seconds
    #[arg(long, default_value = "3")]
    poll_secs: u64,

    /// Cursor overlap in seconds
    #[arg(long, default_value = "30")]
    slack_secs: u64,

    /// Duplicate-collapse bucket width in seconds
    #[arg(long, default_value = "5")]
    bucket_secs: u64,

    /// Identical-send cool-down in seconds
    #[arg(long, default_value = "3")]
    cooldown_secs: u64,

    /// Lead details required before chatting
    #[arg(long, value_enum, default_value = "none")]
    require: Require,

    /// Identity file (defaults to the user data directory)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Visitor name for the lead form
    #[arg(long)]
    name: Option<String>,

    /// Visitor email for the lead form
    #[arg(long)]
    email: Option<String>,
}

impl Cli {
    fn widget_config(&self) -> WidgetConfig {
        WidgetConfig {
            base_url: self.base_url.clone(),
            site_key: SiteKey::new(self.site_key.clone()),
            poll_interval: Duration::from_secs(self.poll_secs),
            cursor_slack: Duration::from_secs(self.slack_secs),
            dedup_bucket: Duration::from_secs(self.bucket_secs),
            send_cooldown: Duration::from_secs(self.cooldown_secs),
            lead_capture: self.require.into(),
            ..WidgetConfig::default()
        }
    }

    fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("innchat")
                .join("identity.json")
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("innchat=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = cli.widget_config();
    let transport = Arc::new(HttpClient::with_timeout(
        &config.base_url,
        Duration::from_secs(10),
    )?);
    let storage = FileStorage::new(cli.state_path());
    info!(
        base_url = %transport.base_url(),
        identity = %storage.path().display(),
        "Starting chat session"
    );

    let (handle, mut events) = ChatWidget::spawn(config, transport, Box::new(storage));

    // The launcher shows after the mount delay; opening early is rejected.
    let mut state = handle.snapshot().await?.state;
    while state == WidgetState::Hidden {
        match events.recv().await {
            Some(WidgetEvent::StateChanged(s)) => state = s,
            Some(_) => {}
            None => return Ok(()),
        }
    }

    if handle.open().await? == WidgetState::Gated {
        let form = LeadForm::new(
            cli.name.clone().unwrap_or_default(),
            cli.email.clone().unwrap_or_default(),
        );
        handle.submit_lead(form).await?;
    }
    println!("Connected. Type a message and press Enter (Ctrl-D to quit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = HashSet::new();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(WidgetEvent::TimelineUpdated(timeline)) => {
                        print_new(&timeline, &mut printed);
                    }
                    Some(WidgetEvent::StateChanged(WidgetState::Closed)) => {
                        println!("-- The conversation was closed by the front desk --");
                        break;
                    }
                    Some(WidgetEvent::StateChanged(s)) => info!(state = %s, "State changed"),
                    Some(WidgetEvent::ConversationAssigned(id)) => {
                        info!(conversation_id = %id, "Conversation assigned");
                    }
                    None => break,
                }
            }

            line = lines.next_line() => {
                match line? {
                    Some(text) if text.trim().is_empty() => {}
                    Some(text) => {
                        if let Err(e) = handle.send(text).await {
                            warn!(error = %e, "Message not sent");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Print timeline entries that are confirmed or failed and not yet shown.
fn print_new(timeline: &[Message], printed: &mut HashSet<String>) {
    for message in timeline {
        if message.is_echo() && !message.status.is_failed() {
            continue;
        }
        if !printed.insert(message.id.as_str().to_string()) {
            continue;
        }
        let who = match message.direction {
            Direction::Visitor => "you".to_string(),
            Direction::Agent => message
                .agent_name
                .clone()
                .unwrap_or_else(|| "front desk".to_string()),
        };
        let time = message
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M");
        let mut line = format!("[{time}] {who}: {}", message.body);
        if let Some(url) = &message.media_url {
            line.push_str(&format!(" <{url}>"));
        }
        if message.status.is_failed() {
            line.push_str(" (not delivered)");
        }
        println!("{line}");
    }
}
