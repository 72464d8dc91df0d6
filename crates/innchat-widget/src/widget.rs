//! The chat widget session.
//!
//! One [`ChatWidget`] exists per mounted chat surface. It runs as a single
//! task that owns the timeline, cursor, lifecycle and identity; the host talks
//! to it through a [`WidgetHandle`] and listens on a [`WidgetEvent`] channel.
//!
//! Network calls run in spawned tasks and report back over an internal
//! channel, so the task stays responsive while a send or poll is pending and
//! every merge happens on the task itself, one batch at a time.

use std::future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use innchat_client::{ClientError, FetchQuery, OutboundMessage, SendReceipt, Transport};
use innchat_core::{
    ConversationId, CoreError, Cursor, DeliveryStatus, LeadForm, Lifecycle, Message, MessageId,
    SendGuard, SessionId, Timeline, WidgetState,
};

use crate::config::WidgetConfig;
use crate::error::WidgetError;
use crate::event::{Reply, WidgetCommand, WidgetEvent, WidgetSnapshot};
use crate::identity::{IdentityStore, Storage};
use crate::poller::Poller;

/// Results of network calls, delivered back to the widget task.
enum Completion {
    Poll {
        generation: u64,
        result: Result<Vec<Message>, ClientError>,
    },
    Send {
        id: MessageId,
        result: Result<SendReceipt, ClientError>,
    },
}

/// Timed lifecycle steps scheduled from mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reveal,
    AutoOpen,
}

/// Handle for driving a running widget.
pub struct WidgetHandle {
    cmd_tx: mpsc::Sender<WidgetCommand>,
    task: JoinHandle<()>,
}

impl WidgetHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> WidgetCommand,
    ) -> Result<T, WidgetError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| WidgetError::Stopped)?;
        rx.await.map_err(|_| WidgetError::Stopped)?
    }

    /// Open the chat surface.
    pub async fn open(&self) -> Result<WidgetState, WidgetError> {
        self.request(|reply| WidgetCommand::Open { reply }).await
    }

    /// Collapse the chat surface, keeping history.
    pub async fn collapse(&self) -> Result<WidgetState, WidgetError> {
        self.request(|reply| WidgetCommand::Collapse { reply }).await
    }

    /// Submit the lead form.
    pub async fn submit_lead(&self, form: LeadForm) -> Result<WidgetState, WidgetError> {
        self.request(|reply| WidgetCommand::SubmitLead { form, reply })
            .await
    }

    /// Send a text message. Returns the local echo.
    pub async fn send(&self, body: impl Into<String>) -> Result<Message, WidgetError> {
        let body = body.into();
        self.request(|reply| WidgetCommand::Send { body, reply })
            .await
    }

    /// Send a media message. Returns the local echo.
    pub async fn send_media(
        &self,
        url: impl Into<String>,
        media_type: Option<String>,
        caption: Option<String>,
    ) -> Result<Message, WidgetError> {
        let url = url.into();
        self.request(|reply| WidgetCommand::SendMedia {
            url,
            media_type,
            caption,
            reply,
        })
        .await
    }

    /// Current timeline, state and identity.
    pub async fn snapshot(&self) -> Result<WidgetSnapshot, WidgetError> {
        self.request(|reply| WidgetCommand::Snapshot { reply }).await
    }

    /// Stop polling and wait for the widget task to end.
    pub async fn shutdown(self) -> Result<(), WidgetError> {
        // The task may already be gone; joining below reports that.
        let _ = self.cmd_tx.send(WidgetCommand::Shutdown).await;
        self.task.await.map_err(|_| WidgetError::Stopped)
    }
}

/// Widget session state, owned by the widget task.
pub struct ChatWidget {
    config: Arc<WidgetConfig>,
    transport: Arc<dyn Transport>,
    identity: IdentityStore,
    session_id: SessionId,
    conversation_id: Option<ConversationId>,
    timeline: Timeline,
    cursor: Option<Cursor>,
    lifecycle: Lifecycle,
    guard: SendGuard,
    poller: Poller,
    pending_step: Option<(Instant, Step)>,
    events: mpsc::Sender<WidgetEvent>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
}

impl ChatWidget {
    /// Mount a widget and start its task.
    ///
    /// Returns the handle for driving it and the receiver for its events.
    pub fn spawn(
        config: WidgetConfig,
        transport: Arc<dyn Transport>,
        storage: Box<dyn Storage>,
    ) -> (WidgetHandle, mpsc::Receiver<WidgetEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let widget = Self::new(config, transport, storage, event_tx);
        let task = tokio::spawn(widget.run(cmd_rx));

        (WidgetHandle { cmd_tx, task }, event_rx)
    }

    fn new(
        config: WidgetConfig,
        transport: Arc<dyn Transport>,
        storage: Box<dyn Storage>,
        events: mpsc::Sender<WidgetEvent>,
    ) -> Self {
        let mut identity = IdentityStore::new(storage);
        let session_id = identity.get_or_create_session(&config.site_key);
        let conversation_id = identity.get_conversation(&config.site_key);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        info!(
            site = %config.site_key,
            session_id = %session_id,
            conversation_id = ?conversation_id.as_ref().map(|c| c.as_str()),
            "Mounting chat widget"
        );

        Self {
            lifecycle: Lifecycle::new(config.lead_capture),
            guard: SendGuard::new(config.cooldown()),
            poller: Poller::new(config.poll_interval),
            pending_step: Some((Instant::now() + config.visible_delay, Step::Reveal)),
            config: Arc::new(config),
            transport,
            identity,
            session_id,
            conversation_id,
            timeline: Timeline::new(),
            cursor: None,
            events,
            done_tx,
            done_rx,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<WidgetCommand>) {
        loop {
            let deadline = self.pending_step.map(|(at, _)| at);

            tokio::select! {
                biased;

                _ = sleep_until(deadline) => {
                    if let Some((_, step)) = self.pending_step.take() {
                        self.run_step(step);
                    }
                }

                Some(done) = self.done_rx.recv() => {
                    self.handle_completion(done);
                }

                _ = self.poller.tick(), if self.lifecycle.should_poll() => {
                    self.begin_poll();
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WidgetCommand::Shutdown) | None => {
                            info!("Received shutdown, unmounting widget");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
            }
        }

        self.poller.stop();
        info!("Widget unmounted");
    }

    fn run_step(&mut self, step: Step) {
        match step {
            Step::Reveal => {
                if self.lifecycle.reveal().is_ok() {
                    self.emit(WidgetEvent::StateChanged(self.lifecycle.state()));
                    self.pending_step = self
                        .config
                        .auto_open_delay
                        .map(|delay| (Instant::now() + delay, Step::AutoOpen));
                }
            }
            Step::AutoOpen => {
                if self.lifecycle.state() == WidgetState::Visible {
                    debug!("Auto-opening chat surface");
                    if let Err(e) = self.open() {
                        debug!(error = %e, "Auto-open skipped");
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: WidgetCommand) {
        match cmd {
            WidgetCommand::Open { reply } => {
                let _ = reply.send(self.open());
            }
            WidgetCommand::Collapse { reply } => {
                let _ = reply.send(self.collapse());
            }
            WidgetCommand::SubmitLead { form, reply } => {
                let _ = reply.send(self.submit_lead(&form));
            }
            WidgetCommand::Send { body, reply } => {
                let _ = reply.send(self.send(body, None));
            }
            WidgetCommand::SendMedia {
                url,
                media_type,
                caption,
                reply,
            } => {
                let body = caption.unwrap_or_default();
                let _ = reply.send(self.send(body, Some((url, media_type))));
            }
            WidgetCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            WidgetCommand::Shutdown => {}
        }
    }

    fn open(&mut self) -> Result<WidgetState, WidgetError> {
        let before = self.lifecycle.state();
        let state = self.lifecycle.open()?;
        self.after_transition(before, state);
        Ok(state)
    }

    fn collapse(&mut self) -> Result<WidgetState, WidgetError> {
        let before = self.lifecycle.state();
        let state = self.lifecycle.collapse()?;
        self.after_transition(before, state);
        Ok(state)
    }

    fn submit_lead(&mut self, form: &LeadForm) -> Result<WidgetState, WidgetError> {
        let before = self.lifecycle.state();
        let state = self.lifecycle.submit_lead(form)?;
        info!("Lead form accepted");
        self.after_transition(before, state);
        Ok(state)
    }

    /// Start or stop polling to match the new state.
    fn after_transition(&mut self, before: WidgetState, after: WidgetState) {
        if before == after {
            return;
        }
        info!(from = %before, to = %after, "Widget state changed");

        if self.lifecycle.should_poll() {
            if self.cursor.is_none() {
                self.cursor = Some(Cursor::starting_at(Utc::now(), self.config.slack()));
            }
            self.poller.start();
        } else {
            self.poller.stop();
        }

        self.emit(WidgetEvent::StateChanged(after));
    }

    fn send(
        &mut self,
        body: String,
        media: Option<(String, Option<String>)>,
    ) -> Result<Message, WidgetError> {
        if !self.lifecycle.is_input_enabled() {
            return Err(CoreError::InputDisabled(self.lifecycle.state().to_string()).into());
        }

        let now = Utc::now();
        let content = match &media {
            Some((url, _)) if body.trim().is_empty() => url.as_str(),
            _ => body.as_str(),
        };
        self.guard.check_and_record(content, now)?;

        let echo = match media {
            Some((url, media_type)) => {
                let caption = (!body.trim().is_empty()).then_some(body);
                self.timeline
                    .append_local_media(url, media_type, caption, now)
            }
            None => self.timeline.append_local(body, now),
        };
        self.emit_timeline();

        let lead = self.lifecycle.lead().cloned().unwrap_or_default();
        let outbound = OutboundMessage {
            message: echo.body.clone(),
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id.clone(),
            client_message_id: echo.id.clone(),
            customer_name: lead.name,
            customer_email: lead.email,
            media_url: echo.media_url.clone(),
            message_type: echo.media_type.clone(),
        };

        debug!(id = %echo.id, "Sending message");
        let transport = Arc::clone(&self.transport);
        let done_tx = self.done_tx.clone();
        let id = echo.id.clone();
        tokio::spawn(async move {
            let result = transport.send_message(&outbound).await;
            let _ = done_tx.send(Completion::Send { id, result });
        });

        Ok(echo)
    }

    fn begin_poll(&mut self) {
        if self.poller.is_fetching() {
            debug!("Previous poll not merged yet, skipping tick");
            return;
        }
        let Some(cursor) = self.cursor else {
            return;
        };

        let query = FetchQuery {
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id.clone(),
            since: cursor.since_param(),
        };
        debug!(since = %query.since, "Poll tick");

        let generation = self.poller.generation();
        let transport = Arc::clone(&self.transport);
        let done_tx = self.done_tx.clone();
        let handle = tokio::spawn(async move {
            let result = transport.fetch_messages(&query).await;
            let _ = done_tx.send(Completion::Poll { generation, result });
        });
        self.poller.begin_fetch(handle);
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Poll { generation, result } => {
                if !self.poller.finish(generation) {
                    return;
                }
                match result {
                    Ok(batch) if batch.is_empty() => {}
                    Ok(batch) => self.apply_batch(batch),
                    Err(e) => {
                        debug!(error = %e, "Poll failed, retrying on next tick");
                    }
                }
            }
            Completion::Send { id, result } => match result {
                Ok(receipt) => {
                    let updated = match receipt.message_id().filter(MessageId::is_durable) {
                        Some(durable) => {
                            debug!(id = %id, durable = %durable, "Send confirmed");
                            self.timeline.confirm_echo(&id, durable)
                        }
                        None => self.timeline.mark_status(&id, DeliveryStatus::Sent),
                    };
                    if updated {
                        self.emit_timeline();
                    }
                    if let Some(conversation_id) = receipt.conversation_id() {
                        self.assign_conversation(conversation_id);
                    }
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Send failed");
                    if self.timeline.mark_status(&id, DeliveryStatus::Failed) {
                        self.emit_timeline();
                    }
                }
            },
        }
    }

    /// Merge one batch, then advance the cursor past it.
    fn apply_batch(&mut self, batch: Vec<Message>) {
        let summary = self
            .timeline
            .merge(batch.clone(), &self.config.reconcile_options());
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.advance_from(&batch);
        }

        debug!(
            before = summary.before,
            after = summary.after,
            changed = summary.changed,
            "Merged batch"
        );

        if summary.changed {
            self.emit_timeline();
        }
        if summary.closed {
            self.close_conversation();
        }
    }

    fn close_conversation(&mut self) {
        let before = self.lifecycle.state();
        match self.lifecycle.close_conversation() {
            Ok(state) if state != before => {
                info!(session_id = %self.session_id, "Conversation closed by agent");
                self.poller.stop();
                self.emit(WidgetEvent::StateChanged(state));
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Ignoring closing signal"),
        }
    }

    fn assign_conversation(&mut self, conversation_id: ConversationId) {
        if self.conversation_id.as_ref() == Some(&conversation_id) {
            return;
        }
        info!(conversation_id = %conversation_id, "Conversation assigned");
        self.identity
            .set_conversation(&self.config.site_key, &conversation_id);
        self.conversation_id = Some(conversation_id.clone());
        if self.poller.is_running() {
            self.poller.restart();
        }
        self.emit(WidgetEvent::ConversationAssigned(conversation_id));
    }

    fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            state: self.lifecycle.state(),
            timeline: self.timeline.messages().to_vec(),
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }

    fn emit_timeline(&self) {
        self.emit(WidgetEvent::TimelineUpdated(self.timeline.messages().to_vec()));
    }

    fn emit(&self, event: WidgetEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(event) {
            warn!("Widget event channel full, dropping event");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use innchat_core::{Direction, LeadCapture};
    use serde_json::json;

    use crate::identity::MemoryStorage;

    /// Transport that replays scripted fetch results and records every call.
    #[derive(Default)]
    struct ScriptedTransport {
        fetches: Mutex<VecDeque<Result<Vec<Message>, ClientError>>>,
        queries: Mutex<Vec<FetchQuery>>,
        sends: Mutex<Vec<OutboundMessage>>,
        fetch_calls: AtomicUsize,
        fail_sends: bool,
        conversation: Option<&'static str>,
        message_id: Option<&'static str>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self::default()
        }

        fn assigning(conversation: &'static str) -> Self {
            Self {
                conversation: Some(conversation),
                ..Self::default()
            }
        }

        fn confirming(message_id: &'static str) -> Self {
            Self {
                message_id: Some(message_id),
                ..Self::default()
            }
        }

        fn failing_sends() -> Self {
            Self {
                fail_sends: true,
                ..Self::default()
            }
        }

        fn push_fetch(&self, result: Result<Vec<Message>, ClientError>) {
            self.fetches.lock().unwrap().push_back(result);
        }

        fn fetch_calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }

        fn queries(&self) -> Vec<FetchQuery> {
            self.queries.lock().unwrap().clone()
        }

        fn sends(&self) -> Vec<OutboundMessage> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_message(
            &self,
            message: &OutboundMessage,
        ) -> Result<SendReceipt, ClientError> {
            self.sends.lock().unwrap().push(message.clone());
            if self.fail_sends {
                return Err(ClientError::Status {
                    status: 502,
                    path: "/widget/message".to_string(),
                });
            }
            Ok(SendReceipt {
                conversation: self.conversation.map(|c| json!(c)),
                message: self.message_id.map(|m| json!(m)),
            })
        }

        async fn fetch_messages(&self, query: &FetchQuery) -> Result<Vec<Message>, ClientError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.clone());
            self.fetches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn config() -> WidgetConfig {
        WidgetConfig {
            event_buffer: 256,
            ..WidgetConfig::default()
        }
    }

    fn spawn_with(
        config: WidgetConfig,
        transport: &Arc<ScriptedTransport>,
    ) -> (WidgetHandle, mpsc::Receiver<WidgetEvent>) {
        let transport: Arc<dyn Transport> = transport.clone();
        ChatWidget::spawn(config, transport, Box::new(MemoryStorage::new()))
    }

    /// Let spawned tasks run and the clock move by `secs` poll-free seconds.
    async fn settle(secs: u64) {
        time::sleep(Duration::from_secs(secs)).await;
    }

    async fn wait_for_state(events: &mut mpsc::Receiver<WidgetEvent>, wanted: WidgetState) {
        time::timeout(Duration::from_secs(60), async {
            while let Some(event) = events.recv().await {
                if event == WidgetEvent::StateChanged(wanted) {
                    return;
                }
            }
        })
        .await
        .expect("state change not observed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_leaves_one_bubble() {
        let transport = Arc::new(ScriptedTransport::new());
        let (handle, _events) = spawn_with(config(), &transport);

        assert_eq!(handle.open().await.unwrap(), WidgetState::Active);
        let echo = handle.send("Hi there").await.unwrap();
        assert_eq!(echo.status, DeliveryStatus::Sending);
        assert!(echo.is_echo());

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.timeline.len(), 1);
        assert_eq!(snapshot.timeline[0].id, echo.id);

        transport.push_fetch(Ok(vec![Message::confirmed(
            "srv-100",
            "Hi there",
            Direction::Visitor,
            Utc::now(),
        )]));
        settle(4).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.timeline.len(), 1);
        let bubble = &snapshot.timeline[0];
        assert_eq!(bubble.id.as_str(), "srv-100");
        assert_eq!(bubble.status, DeliveryStatus::Sent);
        assert_eq!(bubble.body, "Hi there");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_receipt_id_replaces_echo_id() {
        let transport = Arc::new(ScriptedTransport::confirming("srv-42"));
        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();

        let echo = handle.send("Is there a late check-in?").await.unwrap();
        settle(1).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.timeline.len(), 1);
        assert_eq!(snapshot.timeline[0].id.as_str(), "srv-42");
        assert_eq!(snapshot.timeline[0].status, DeliveryStatus::Sent);
        assert!(snapshot.timeline.iter().all(|m| m.id != echo.id));

        transport.push_fetch(Ok(vec![Message::confirmed(
            "srv-42",
            "Is there a late check-in?",
            Direction::Visitor,
            Utc::now(),
        )
        .with_status(DeliveryStatus::Read)]));
        settle(3).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.timeline.len(), 1);
        assert_eq!(snapshot.timeline[0].status, DeliveryStatus::Read);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_signal_stops_polling_and_input() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_fetch(Ok(vec![Message::confirmed(
            "sys-1",
            "The agent has closed this conversation.",
            Direction::Agent,
            Utc::now(),
        )
        .closing()]));

        let (handle, mut events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();
        wait_for_state(&mut events, WidgetState::Closed).await;

        let calls = transport.fetch_calls();
        assert_eq!(calls, 1);
        settle(60).await;
        assert_eq!(transport.fetch_calls(), calls);

        let err = handle.send("hello?").await.unwrap_err();
        assert!(matches!(err, WidgetError::Core(CoreError::InputDisabled(_))));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, WidgetState::Closed);
        assert_eq!(snapshot.timeline.len(), 1);
        assert!(handle.open().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_polls_do_not_duplicate() {
        let transport = Arc::new(ScriptedTransport::new());
        let first = vec![
            Message::confirmed("1", "Any rooms for Friday?", Direction::Visitor, Utc::now()),
            Message::confirmed("2", "Yes, two doubles left.", Direction::Agent, Utc::now()),
        ];
        let mut second = first.clone();
        second.push(Message::confirmed(
            "3",
            "I'll take one",
            Direction::Visitor,
            Utc::now(),
        ));
        transport.push_fetch(Ok(first));
        transport.push_fetch(Ok(second));

        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();
        settle(10).await;

        let ids: Vec<String> = handle
            .snapshot()
            .await
            .unwrap()
            .timeline
            .into_iter()
            .map(|m| m.id.into_inner())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_fetch(Err(ClientError::Status {
            status: 503,
            path: "/widget/session".to_string(),
        }));
        transport.push_fetch(Ok(vec![Message::confirmed(
            "a1",
            "Welcome!",
            Direction::Agent,
            Utc::now(),
        )]));

        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();
        settle(4).await;

        assert!(transport.fetch_calls() >= 2);
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, WidgetState::Active);
        assert_eq!(snapshot.timeline.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_since_param_uses_cursor_minus_slack() {
        let transport = Arc::new(ScriptedTransport::new());
        let server_time = Utc::now() + chrono::Duration::minutes(5);
        transport.push_fetch(Ok(vec![Message::confirmed(
            "a1",
            "Check-in is at 3pm",
            Direction::Agent,
            server_time,
        )]));

        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();
        settle(4).await;

        let queries = transport.queries();
        assert!(queries.len() >= 2);
        assert_eq!(
            queries[1].since,
            server_time - chrono::Duration::seconds(30)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_collapse_pauses_polling_and_keeps_history() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_fetch(Ok(vec![Message::confirmed(
            "a1",
            "Hello from reception",
            Direction::Agent,
            Utc::now(),
        )]));

        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();
        settle(1).await;
        assert_eq!(handle.collapse().await.unwrap(), WidgetState::Visible);

        let calls = transport.fetch_calls();
        settle(30).await;
        assert_eq!(transport.fetch_calls(), calls);

        handle.open().await.unwrap();
        settle(1).await;
        assert!(transport.fetch_calls() > calls);
        assert_eq!(handle.snapshot().await.unwrap().timeline.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_assignment_persists_and_restarts_poller() {
        let transport = Arc::new(ScriptedTransport::assigning("conv-77"));
        let storage = MemoryStorage::new();
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let (handle, mut events) =
            ChatWidget::spawn(config(), dyn_transport, Box::new(storage.clone()));

        handle.open().await.unwrap();
        handle.send("Do you have parking?").await.unwrap();

        time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events.recv().await {
                if let WidgetEvent::ConversationAssigned(id) = event {
                    assert_eq!(id.as_str(), "conv-77");
                    return;
                }
            }
        })
        .await
        .expect("conversation not assigned");

        settle(1).await;
        let last = transport.queries().pop().unwrap();
        assert_eq!(last.conversation_id, Some(ConversationId::new("conv-77")));

        let sent = &transport.sends()[0];
        assert_eq!(sent.conversation_id, None);

        let reloaded = IdentityStore::new(Box::new(storage));
        assert_eq!(
            reloaded.get_conversation(&config().site_key),
            Some(ConversationId::new("conv-77"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_marks_echo_failed() {
        let transport = Arc::new(ScriptedTransport::failing_sends());
        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();

        let echo = handle.send("Is the pool open?").await.unwrap();
        settle(1).await;

        let snapshot = handle.snapshot().await.unwrap();
        let entry = snapshot.timeline.iter().find(|m| m.id == echo.id).unwrap();
        assert_eq!(entry.status, DeliveryStatus::Failed);

        let err = handle.send("Is the pool open?").await.unwrap_err();
        assert!(matches!(
            err,
            WidgetError::Core(CoreError::DuplicateSend { .. })
        ));
        assert_eq!(transport.sends().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lead_gate_before_chat() {
        let transport = Arc::new(ScriptedTransport::new());
        let config = WidgetConfig {
            lead_capture: LeadCapture::NameAndEmail,
            ..config()
        };
        let (handle, _events) = spawn_with(config, &transport);

        assert_eq!(handle.open().await.unwrap(), WidgetState::Gated);
        assert!(handle.send("hi").await.is_err());
        assert_eq!(transport.fetch_calls(), 0);

        let bad = handle
            .submit_lead(LeadForm::new("Ana", "not-an-email"))
            .await;
        assert!(matches!(
            bad,
            Err(WidgetError::Core(CoreError::InvalidInput(_)))
        ));

        let state = handle
            .submit_lead(LeadForm::new("Ana", "ana@example.com"))
            .await
            .unwrap();
        assert_eq!(state, WidgetState::Active);

        handle.send("hi").await.unwrap();
        settle(1).await;
        let sent = &transport.sends()[0];
        assert_eq!(sent.customer_name.as_deref(), Some("Ana"));
        assert_eq!(sent.customer_email.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_and_auto_open_delays() {
        let transport = Arc::new(ScriptedTransport::new());
        let config = WidgetConfig {
            visible_delay: Duration::from_secs(2),
            auto_open_delay: Some(Duration::from_secs(5)),
            ..config()
        };
        let (handle, mut events) = spawn_with(config, &transport);

        let start = Instant::now();
        wait_for_state(&mut events, WidgetState::Visible).await;
        assert_eq!(Instant::now() - start, Duration::from_secs(2));

        wait_for_state(&mut events, WidgetState::Active).await;
        assert_eq!(Instant::now() - start, Duration::from_secs(7));
        assert_eq!(handle.snapshot().await.unwrap().state, WidgetState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_send_carries_url() {
        let transport = Arc::new(ScriptedTransport::new());
        let (handle, _events) = spawn_with(config(), &transport);
        handle.open().await.unwrap();

        let echo = handle
            .send_media(
                "https://cdn.example/id-card.jpg",
                Some("image".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(echo.body.is_empty());
        settle(1).await;

        let sent = &transport.sends()[0];
        assert_eq!(
            sent.media_url.as_deref(),
            Some("https://cdn.example/id-card.jpg")
        );
        assert_eq!(sent.message_type.as_deref(), Some("image"));
    }
}
