//! Conversation Grouping
//!
//! Partitions a flat message list into conversation groups:
//!
//! - messages carrying both a channel and a thread id group under `channel:thread`
//! - channel-only messages are split on idle gaps into `channel:timegap_N`
//! - everything else lands in the single `ungrouped` bucket
//!
//! Channel and thread ids are escaped inside keys (`\` and `:` get a leading
//! backslash), and a time-gap key that is already taken by a thread gets a
//! `#N` suffix. Every distinct input id ends up in exactly one group, and ids
//! within a group are ordered by `sent_at` (ties keep input order).

use std::collections::{BTreeMap, HashSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageArena, MessageId};

/// Key of the bucket for messages without any channel linkage
pub const UNGROUPED_KEY: &str = "ungrouped";

/// Default idle gap (seconds) that splits channel-only conversations
pub const DEFAULT_IDLE_GAP_SECONDS: i64 = 600;

/// Conversation groups keyed by group key, in deterministic key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationGroups {
    groups: BTreeMap<String, Vec<MessageId>>,
}

impl ConversationGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, ids: Vec<MessageId>) {
        if !ids.is_empty() {
            self.groups.insert(key.into(), ids);
        }
    }

    /// Insert under `key`, or under `key#N` for the smallest free N when the
    /// key is taken. Returns the key actually used.
    pub fn insert_unique(&mut self, key: impl Into<String>, ids: Vec<MessageId>) -> String {
        let key = key.into();
        if !self.groups.contains_key(&key) {
            self.insert(key.clone(), ids);
            return key;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}#{}", key, n);
            if !self.groups.contains_key(&candidate) {
                self.insert(candidate.clone(), ids);
                return candidate;
            }
            n += 1;
        }
    }

    pub fn get(&self, key: &str) -> Option<&[MessageId]> {
        self.groups.get(key).map(|ids| ids.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MessageId])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(|k| k.as_str())
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of message ids across all groups
    pub fn total_messages(&self) -> usize {
        self.groups.values().map(|ids| ids.len()).sum()
    }

    /// Remove the given ids from every group, dropping groups that become empty.
    pub fn remove_messages(&mut self, selected: &[MessageId]) {
        if selected.is_empty() {
            return;
        }
        let selected: HashSet<&str> = selected.iter().map(|id| id.as_str()).collect();
        self.groups.retain(|_, ids| {
            ids.retain(|id| !selected.contains(id.as_str()));
            !ids.is_empty()
        });
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<MessageId>> {
        self.groups
    }
}

impl From<BTreeMap<String, Vec<MessageId>>> for ConversationGroups {
    fn from(mut groups: BTreeMap<String, Vec<MessageId>>) -> Self {
        groups.retain(|_, ids| !ids.is_empty());
        Self { groups }
    }
}

/// Partition messages into conversation groups.
pub fn group_messages(messages: &[Message], idle_gap: Duration) -> ConversationGroups {
    let arena = MessageArena::new(messages);
    group_arena(&arena, idle_gap)
}

/// Partition the messages of an arena into conversation groups.
pub fn group_arena(arena: &MessageArena<'_>, idle_gap: Duration) -> ConversationGroups {
    let mut threaded: BTreeMap<String, Vec<&Message>> = BTreeMap::new();
    let mut by_channel: BTreeMap<&str, Vec<&Message>> = BTreeMap::new();
    let mut ungrouped: Vec<&Message> = Vec::new();

    for message in arena.iter() {
        match (
            message.source_channel_id.as_deref(),
            message.source_thread_id.as_deref(),
        ) {
            (Some(channel), Some(thread)) => threaded
                .entry(format!("{}:{}", escape_key_part(channel), escape_key_part(thread)))
                .or_default()
                .push(message),
            (Some(channel), None) => by_channel.entry(channel).or_default().push(message),
            _ => ungrouped.push(message),
        }
    }

    let mut groups = ConversationGroups::new();

    // Thread keys are distinct after escaping; only time-gap keys can clash.
    for (key, mut members) in threaded {
        sort_chronologically(&mut members);
        groups.insert(key, ids_of(&members));
    }

    for (channel, mut members) in by_channel {
        sort_chronologically(&mut members);
        let channel = escape_key_part(channel);
        for (n, segment) in split_on_idle_gap(&members, idle_gap).into_iter().enumerate() {
            groups.insert_unique(format!("{}:timegap_{}", channel, n), ids_of(segment));
        }
    }

    if !ungrouped.is_empty() {
        sort_chronologically(&mut ungrouped);
        groups.insert_unique(UNGROUPED_KEY, ids_of(&ungrouped));
    }

    groups
}

/// Backslash-escape `\` and `:` so a `channel:thread` key splits one way only.
fn escape_key_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        if c == '\\' || c == ':' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Split a chronologically sorted run of messages wherever consecutive
/// messages are further apart than `idle_gap`.
fn split_on_idle_gap<'m, 'a>(
    members: &'m [&'a Message],
    idle_gap: Duration,
) -> Vec<&'m [&'a Message]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for i in 1..members.len() {
        if members[i].sent_at - members[i - 1].sent_at > idle_gap {
            segments.push(&members[start..i]);
            start = i;
        }
    }
    if start < members.len() {
        segments.push(&members[start..]);
    }
    segments
}

/// Members arrive in input order; the stable sort keeps it for equal timestamps.
fn sort_chronologically(members: &mut [&Message]) {
    members.sort_by_key(|m| m.sent_at);
}

fn ids_of(members: &[&Message]) -> Vec<MessageId> {
    members.iter().map(|m| m.id.clone()).collect()
}
