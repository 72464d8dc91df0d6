//! Merging server batches into the local timeline.
//!
//! [`reconcile`] is a pure function over the current timeline and one batch
//! of confirmed records. It does not care whether the batch came from a poll,
//! a push stream or a replay; the widget runs it once per batch.
//!
//! The pass runs in four steps:
//!
//! 1. Records whose id is already known update that entry in place.
//! 2. Records matching a local echo (same direction, same normalized content)
//!    take over the echo's slot, so the echo becomes its durable counterpart.
//! 3. Anything else is appended.
//! 4. Entries are grouped by direction, normalized content and time bucket;
//!    each group keeps its highest scoring member. The survivors are stably
//!    sorted by timestamp.
//!
//! Applying the pass again with an empty batch leaves the result unchanged.

use std::collections::HashMap;

use chrono::Duration;

use crate::{Direction, Message, MessageId};

/// Bonus added to the score of entries carrying a server id.
const DURABLE_BONUS: u8 = 2;

/// Tunables for [`reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Width of the time bucket used to collapse near-identical entries.
    pub bucket: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            bucket: Duration::seconds(5),
        }
    }
}

impl ReconcileOptions {
    /// Options with the given bucket width.
    pub fn with_bucket(bucket: Duration) -> Self {
        Self { bucket }
    }

    fn bucket_ms(&self) -> i64 {
        self.bucket.num_milliseconds().max(1)
    }
}

/// Trim and collapse every run of whitespace into one space.
pub fn normalize_body(body: &str) -> String {
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content compared when matching echoes and collapsing duplicates.
///
/// Media-only messages have no body, so their media URL stands in.
fn content_key(message: &Message) -> String {
    let normalized = normalize_body(&message.body);
    match (&message.media_url, normalized.is_empty()) {
        (Some(url), true) => url.clone(),
        _ => normalized,
    }
}

/// Grouping key of the bucketed dedup pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub direction: Direction,
    pub content: String,
    pub bucket: i64,
}

/// Compute the dedup key of a message for the given options.
pub fn dedup_key(message: &Message, options: &ReconcileOptions) -> DedupKey {
    DedupKey {
        direction: message.direction,
        content: content_key(message),
        bucket: message
            .timestamp
            .timestamp_millis()
            .div_euclid(options.bucket_ms()),
    }
}

/// Survivor score: status rank plus a bonus for durable ids.
pub fn score(message: &Message) -> u8 {
    let bonus = if message.id.is_durable() {
        DURABLE_BONUS
    } else {
        0
    };
    message.status.rank() + bonus
}

/// Merge a batch of confirmed records into `timeline`.
///
/// Returns the new timeline; the input is left untouched.
pub fn reconcile(
    timeline: &[Message],
    batch: Vec<Message>,
    options: &ReconcileOptions,
) -> Vec<Message> {
    let mut merged = timeline.to_vec();
    let mut index: HashMap<MessageId, usize> = merged
        .iter()
        .enumerate()
        .map(|(pos, msg)| (msg.id.clone(), pos))
        .collect();

    for incoming in batch {
        if let Some(&pos) = index.get(&incoming.id) {
            upgrade_in_place(&mut merged[pos], incoming);
            continue;
        }

        let content = content_key(&incoming);
        let matches = |existing: &Message| {
            existing.id.is_temporary()
                && existing.direction == incoming.direction
                && content_key(existing) == content
        };
        // Live echoes first; a failed echo is only claimed when nothing else matches.
        let echo_pos = merged
            .iter()
            .position(|existing| matches(existing) && !existing.status.is_failed())
            .or_else(|| merged.iter().position(matches));

        match echo_pos {
            Some(pos) => {
                index.remove(&merged[pos].id);
                index.insert(incoming.id.clone(), pos);
                merged[pos] = incoming;
            }
            None => {
                index.insert(incoming.id.clone(), merged.len());
                merged.push(incoming);
            }
        }
    }

    let mut survivors = collapse_buckets(merged, options);
    survivors.sort_by_key(|msg| msg.timestamp);
    survivors
}

/// Apply a newer copy of a known record without regressing its status.
fn upgrade_in_place(existing: &mut Message, incoming: Message) {
    if incoming.status.rank() >= existing.status.rank() && !incoming.status.is_failed() {
        existing.status = incoming.status;
    }
    if incoming.id.is_durable() {
        existing.timestamp = incoming.timestamp;
        if !incoming.body.is_empty() {
            existing.body = incoming.body;
        }
    }
    if incoming.agent_name.is_some() {
        existing.agent_name = incoming.agent_name;
    }
    if incoming.media_url.is_some() {
        existing.media_url = incoming.media_url;
        existing.media_type = incoming.media_type;
    }
    existing.closes_conversation |= incoming.closes_conversation;
}

/// Keep one entry per dedup group: highest score wins, ties keep the first seen.
fn collapse_buckets(entries: Vec<Message>, options: &ReconcileOptions) -> Vec<Message> {
    let mut survivors: Vec<Message> = Vec::with_capacity(entries.len());
    let mut groups: HashMap<DedupKey, usize> = HashMap::new();

    for entry in entries {
        let key = dedup_key(&entry, options);
        match groups.get(&key) {
            Some(&slot) => {
                if score(&entry) > score(&survivors[slot]) {
                    survivors[slot] = entry;
                }
            }
            None => {
                groups.insert(key, survivors.len());
                survivors.push(entry);
            }
        }
    }

    survivors
}
