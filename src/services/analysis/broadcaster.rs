//! Event Broadcasters
//!
//! In-process delivery of [`AnalysisEvent`]s. Publishing never blocks and never
//! fails: with no subscribers the event is dropped, and slow subscribers see
//! `RecvError::Lagged` instead of stalling the publisher.
//!
//! Sequence numbers are assigned and sent under one lock, so every subscriber
//! sees them strictly increasing.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use convo_tasks_core::{AnalysisEvent, EventBroadcaster};

pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 256;

/// An event together with its topic and publish order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicEvent {
    pub sequence: u64,
    pub topic: String,
    pub event: AnalysisEvent,
}

/// Broadcaster backed by a `tokio::sync::broadcast` channel
#[derive(Debug)]
pub struct ChannelBroadcaster {
    next_sequence: Mutex<u64>,
    sender: broadcast::Sender<TopicEvent>,
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_CAPACITY)
    }
}

impl ChannelBroadcaster {
    /// Create a broadcaster; a zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            next_sequence: Mutex::new(0),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventBroadcaster for ChannelBroadcaster {
    fn notify(&self, topic: &str, event: AnalysisEvent) {
        // a panic elsewhere cannot leave the counter half-updated
        let mut next = self
            .next_sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let envelope = TopicEvent {
            sequence: *next,
            topic: topic.to_string(),
            event,
        };
        *next += 1;
        if self.sender.send(envelope).is_err() {
            tracing::trace!("[Events] No subscribers for topic {}", topic);
        }
    }
}

/// Broadcaster that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcaster;

impl EventBroadcaster for NoopBroadcaster {
    fn notify(&self, _topic: &str, _event: AnalysisEvent) {}
}
