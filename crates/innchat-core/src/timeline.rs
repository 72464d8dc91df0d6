//! The rendered message timeline.

use chrono::{DateTime, Utc};

use crate::reconcile::{reconcile, ReconcileOptions};
use crate::{DeliveryStatus, Message, MessageId};

/// Ordered list of messages shown in the chat surface.
///
/// Entries are added by [`Timeline::append_local`] (optimistic echo) and
/// [`Timeline::merge`] (reconciliation). They stay sorted by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    messages: Vec<Message>,
}

/// Outcome of merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Entries before the merge.
    pub before: usize,
    /// Entries after the merge.
    pub after: usize,
    /// Whether anything visible changed.
    pub changed: bool,
    /// Whether the batch carried the conversation-closed signal.
    pub closed: bool,
}

impl Timeline {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if there is nothing to show.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Append a visitor echo with a temporary id and `sending` status.
    pub fn append_local(&mut self, body: impl Into<String>, now: DateTime<Utc>) -> Message {
        self.insert_echo(Message::echo(body, now))
    }

    /// Append a visitor media echo, with an optional caption as body.
    pub fn append_local_media(
        &mut self,
        url: impl Into<String>,
        media_type: Option<String>,
        caption: Option<String>,
        now: DateTime<Utc>,
    ) -> Message {
        let echo = Message::echo(caption.unwrap_or_default(), now).with_media(url, media_type);
        self.insert_echo(echo)
    }

    fn insert_echo(&mut self, echo: Message) -> Message {
        // Server clocks may run ahead of ours; keep the ordering invariant.
        let pos = self
            .messages
            .partition_point(|m| m.timestamp <= echo.timestamp);
        self.messages.insert(pos, echo.clone());
        echo
    }

    /// Set the status of an entry. Returns false if the id is gone.
    ///
    /// An echo that was already replaced by its confirmed record no longer
    /// exists under its temporary id, so a late send result is a no-op here.
    pub fn mark_status(&mut self, id: &MessageId, status: DeliveryStatus) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(msg) => {
                msg.status = status;
                true
            }
            None => false,
        }
    }

    /// Reconcile a batch of confirmed records into the timeline.
    pub fn merge(&mut self, batch: Vec<Message>, options: &ReconcileOptions) -> MergeSummary {
        let before = self.messages.len();
        let closed = batch.iter().any(|m| m.closes_conversation);
        let merged = reconcile(&self.messages, batch, options);
        let changed = merged != self.messages;
        self.messages = merged;

        MergeSummary {
            before,
            after: self.messages.len(),
            changed,
            closed,
        }
    }

    /// Give an echo the durable id the server assigned on send.
    ///
    /// If a poll already delivered that record, the echo is dropped instead.
    /// Returns false if the echo is gone.
    pub fn confirm_echo(&mut self, temp: &MessageId, durable: MessageId) -> bool {
        let Some(pos) = self.messages.iter().position(|m| &m.id == temp) else {
            return false;
        };
        if self.messages.iter().any(|m| m.id == durable) {
            self.messages.remove(pos);
            return true;
        }
        let echo = &mut self.messages[pos];
        echo.id = durable;
        if echo.status.rank() < DeliveryStatus::Sent.rank() {
            echo.status = DeliveryStatus::Sent;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_append_local_is_immediate_echo() {
        let mut timeline = Timeline::new();
        let echo = timeline.append_local("Hi there", at(0));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0], echo);
        assert_eq!(echo.status, DeliveryStatus::Sending);
    }

    #[test]
    fn test_append_keeps_timestamp_order() {
        let mut timeline = Timeline::new();
        timeline.merge(
            vec![Message::confirmed("a", "ahead", Direction::Agent, at(100))],
            &ReconcileOptions::default(),
        );
        timeline.append_local("behind", at(10));
        let ts: Vec<_> = timeline.messages().iter().map(|m| m.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_round_trip_scenario() {
        let mut timeline = Timeline::new();
        let echo = timeline.append_local("Hi there", at(0));
        assert!(timeline.mark_status(&echo.id, DeliveryStatus::Sent));

        let summary = timeline.merge(
            vec![Message::confirmed("srv-1", "Hi there", Direction::Visitor, at(1))],
            &ReconcileOptions::default(),
        );
        assert!(summary.changed);
        assert_eq!(summary.after, 1);

        let only = &timeline.messages()[0];
        assert_eq!(only.id.as_str(), "srv-1");
        assert_eq!(only.status, DeliveryStatus::Sent);
        assert_eq!(only.body, "Hi there");

        // The send response arriving after the poll must not resurrect the echo.
        assert!(!timeline.mark_status(&echo.id, DeliveryStatus::Sent));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_confirm_echo_takes_durable_id() {
        let mut timeline = Timeline::new();
        let echo = timeline.append_local("Two nights please", at(0));
        assert!(timeline.confirm_echo(&echo.id, MessageId::new("srv-5")));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].id.as_str(), "srv-5");
        assert_eq!(timeline.messages()[0].status, DeliveryStatus::Sent);

        // The poll then upgrades the same entry instead of adding one.
        timeline.merge(
            vec![Message::confirmed("srv-5", "Two nights please", Direction::Visitor, at(40))
                .with_status(DeliveryStatus::Delivered)],
            &ReconcileOptions::default(),
        );
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_confirm_echo_after_poll_drops_echo() {
        let mut timeline = Timeline::new();
        let echo = timeline.append_local("hello", at(0));
        let stray = Message::confirmed("srv-1", "hello again", Direction::Visitor, at(1));
        timeline.merge(vec![stray], &ReconcileOptions::default());

        assert!(timeline.confirm_echo(&echo.id, MessageId::new("srv-1")));
        assert_eq!(timeline.len(), 1);
        assert!(!timeline.confirm_echo(&echo.id, MessageId::new("srv-1")));
    }

    #[test]
    fn test_failed_echo_stays_visible() {
        let mut timeline = Timeline::new();
        let echo = timeline.append_local("Can I book room 12?", at(0));
        timeline.mark_status(&echo.id, DeliveryStatus::Failed);
        timeline.merge(Vec::new(), &ReconcileOptions::default());
        assert_eq!(
            timeline.get(&echo.id).map(|m| m.status),
            Some(DeliveryStatus::Failed)
        );
    }

    #[test]
    fn test_merge_reports_closing_signal() {
        let mut timeline = Timeline::new();
        let closing = Message::confirmed("c", "Chat ended by agent", Direction::Agent, at(0)).closing();
        let summary = timeline.merge(vec![closing], &ReconcileOptions::default());
        assert!(summary.closed);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_media_echo() {
        let mut timeline = Timeline::new();
        let echo = timeline.append_local_media(
            "https://cdn.example/passport.png",
            Some("image".to_string()),
            None,
            at(0) + Duration::milliseconds(5),
        );
        assert!(echo.has_media());
        assert!(echo.body.is_empty());
    }
}
