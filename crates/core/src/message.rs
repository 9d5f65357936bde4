//! Message Types
//!
//! Read-only chat messages handed to the analysis pipeline, the time window a
//! run covers, and an immutable arena used by the grouping and batching passes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Identifier of a chat message as assigned by the message source.
pub type MessageId = String;

/// A chat message as delivered by the external message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub source_channel_id: Option<String>,
    #[serde(default)]
    pub source_thread_id: Option<String>,
    #[serde(default)]
    pub source_parent_id: Option<String>,
}

impl Message {
    /// Create a message without any channel or thread linkage
    pub fn new(id: impl Into<String>, content: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sent_at,
            source_channel_id: None,
            source_thread_id: None,
            source_parent_id: None,
        }
    }

    /// Set the source channel
    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.source_channel_id = Some(channel_id.into());
        self
    }

    /// Set the source thread
    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.source_thread_id = Some(thread_id.into());
        self
    }

    /// Set the parent message this one replies to
    pub fn replying_to(mut self, parent_id: impl Into<String>) -> Self {
        self.source_parent_id = Some(parent_id.into());
        self
    }
}

/// Half-open time range `[start, end)` covered by an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting empty or inverted ranges
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.start >= self.end {
            return Err(CoreError::validation(format!(
                "Time window start ({}) must be before end ({})",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        Ok(())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Immutable snapshot of the messages for one orchestration pass.
///
/// Groups and batches only carry ids; the arena resolves them back to messages
/// (and their timestamps) without copying. When the input contains the same id
/// more than once, the first occurrence wins.
#[derive(Debug)]
pub struct MessageArena<'a> {
    messages: &'a [Message],
    index: HashMap<&'a str, usize>,
}

impl<'a> MessageArena<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        let mut index = HashMap::with_capacity(messages.len());
        for (position, message) in messages.iter().enumerate() {
            index.entry(message.id.as_str()).or_insert(position);
        }
        Self { messages, index }
    }

    pub fn get(&self, id: &str) -> Option<&'a Message> {
        self.index.get(id).map(|&position| &self.messages[position])
    }

    /// Position of the message in the original input
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn sent_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.get(id).map(|m| m.sent_at)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Distinct messages in input order
    pub fn iter(&self) -> impl Iterator<Item = &'a Message> + '_ {
        self.messages
            .iter()
            .enumerate()
            .filter(|(position, m)| self.index.get(m.id.as_str()) == Some(position))
            .map(|(_, m)| m)
    }

    /// Number of distinct message ids
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Seconds between the earliest and latest of the given messages
    pub fn time_span_seconds(&self, ids: &[MessageId]) -> i64 {
        let mut times = ids.iter().filter_map(|id| self.sent_at(id));
        let Some(first) = times.next() else {
            return 0;
        };
        let (earliest, latest) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        (latest - earliest).num_seconds()
    }
}
