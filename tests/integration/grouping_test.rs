//! Grouping and Batch Selection Tests
//!
//! Properties checked over generated message sets:
//! - every distinct message lands in exactly one conversation group, including
//!   when channel and thread ids contain `:` or look like generated keys
//! - batches never exceed the size limit and drain every message
//! - oversized conversations are split across batches, earliest messages first

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, TimeZone, Utc};

use convo_tasks_core::{
    drain_batches, group_messages, select_batch, ConversationGroups, Message, MessageArena,
    MessageId, UNGROUPED_KEY,
};

// ============================================================================
// Helpers
// ============================================================================

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

/// Small deterministic generator so the message sets are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

fn generated_messages(seed: u64, count: usize) -> Vec<Message> {
    let mut rng = Lcg(seed);
    (0..count)
        .map(|i| {
            let sent_at = base() + Duration::seconds(rng.next(6 * 3600) as i64);
            let message = Message::new(format!("m{}", i), format!("message {}", i), sent_at);
            match rng.next(4) {
                0 => message,
                1 => message.in_channel(format!("c{}", rng.next(3))),
                2 => message
                    .in_channel(format!("c{}", rng.next(3)))
                    .in_thread(format!("t{}", rng.next(2))),
                _ => message.in_thread("orphan-thread"),
            }
        })
        .collect()
}

/// Channel and thread ids that look like key separators or generated keys
const AWKWARD_IDS: [&str; 10] = [
    "a",
    "a:b",
    "b:c",
    "c",
    "timegap_0",
    "timegap_1",
    "timegap_0#1",
    "x\\",
    "\\:",
    "ungrouped",
];

fn pick(rng: &mut Lcg) -> &'static str {
    AWKWARD_IDS[rng.next(AWKWARD_IDS.len() as u64) as usize]
}

fn awkward_messages(seed: u64, count: usize) -> Vec<Message> {
    let mut rng = Lcg(seed);
    (0..count)
        .map(|i| {
            let sent_at = base() + Duration::seconds(rng.next(4 * 3600) as i64);
            let message = Message::new(format!("m{}", i), "x", sent_at);
            match rng.next(3) {
                0 => message.in_channel(pick(&mut rng)),
                1 => message.in_channel(pick(&mut rng)).in_thread(pick(&mut rng)),
                _ => message,
            }
        })
        .collect()
}

/// Idle gap that varies with the seed, from one minute to just over an hour
fn gap_for(seed: u64) -> Duration {
    Duration::seconds(60 + (seed as i64 * 137) % 3600)
}

fn assert_partition(messages: &[Message], groups: &ConversationGroups, seed: u64) {
    let all = flatten(groups);
    let unique: HashSet<&MessageId> = all.iter().collect();
    assert_eq!(all.len(), unique.len(), "seed {} duplicated a message", seed);
    assert_eq!(all.len(), messages.len(), "seed {} lost a message", seed);
}

fn flatten(groups: &ConversationGroups) -> Vec<MessageId> {
    groups.iter().flat_map(|(_, ids)| ids.iter().cloned()).collect()
}

// ============================================================================
// Grouping
// ============================================================================

#[test]
fn test_partition_property_over_generated_sets() {
    for seed in 1..=25u64 {
        let messages = generated_messages(seed, 40 + seed as usize);
        let groups = group_messages(&messages, gap_for(seed));
        assert_partition(&messages, &groups, seed);
    }
}

#[test]
fn test_partition_property_with_awkward_ids() {
    for seed in 1..=40u64 {
        let messages = awkward_messages(seed, 30 + seed as usize);
        let groups = group_messages(&messages, gap_for(seed));
        assert_partition(&messages, &groups, seed);

        // a group never mixes two linkages
        let linkage: HashMap<&str, (Option<&str>, Option<&str>)> = messages
            .iter()
            .map(|m| {
                (
                    m.id.as_str(),
                    (m.source_channel_id.as_deref(), m.source_thread_id.as_deref()),
                )
            })
            .collect();
        for (key, ids) in groups.iter() {
            let kinds: HashSet<_> = ids.iter().map(|id| linkage[id.as_str()]).collect();
            assert_eq!(kinds.len(), 1, "seed {} merged linkages under {}", seed, key);
        }
    }
}

#[test]
fn test_thread_named_like_timegap_key_is_kept() {
    let messages = vec![
        Message::new("threaded", "x", base()).in_channel("c1").in_thread("timegap_0"),
        Message::new("plain", "y", base() + Duration::minutes(1)).in_channel("c1"),
    ];
    let groups = group_messages(&messages, Duration::seconds(600));

    assert_eq!(groups.len(), 2);
    assert_eq!(groups.total_messages(), 2);
}

#[test]
fn test_grouping_is_deterministic() {
    let messages = generated_messages(7, 80);
    let first = group_messages(&messages, Duration::seconds(600));
    let second = group_messages(&messages, Duration::seconds(600));
    assert_eq!(first.into_inner(), second.into_inner());
}

#[test]
fn test_thread_without_channel_is_ungrouped() {
    let messages = vec![
        Message::new("a", "x", base()).in_thread("t1"),
        Message::new("b", "y", base() + Duration::minutes(1)),
    ];
    let groups = group_messages(&messages, Duration::seconds(600));
    assert_eq!(groups.len(), 1);
    assert_eq!(groups.get(UNGROUPED_KEY).unwrap(), ["a".to_string(), "b".to_string()]);
}

#[test]
fn test_idle_gap_splits_channel_conversations() {
    let messages = vec![
        Message::new("m1", "a", base()).in_channel("c1"),
        Message::new("m2", "b", base() + Duration::minutes(5)).in_channel("c1"),
        Message::new("m3", "c", base() + Duration::minutes(20)).in_channel("c1"),
    ];
    let groups = group_messages(&messages, Duration::seconds(600));

    assert_eq!(groups.get("c1:timegap_0").unwrap(), ["m1".to_string(), "m2".to_string()]);
    assert_eq!(groups.get("c1:timegap_1").unwrap(), ["m3".to_string()]);
}

#[test]
fn test_empty_input_produces_no_groups() {
    let groups = group_messages(&[], Duration::seconds(600));
    assert!(groups.is_empty());
}

// ============================================================================
// Batch selection
// ============================================================================

#[test]
fn test_drained_batches_respect_limit_and_cover_everything() {
    for seed in 1..=20u64 {
        let messages = generated_messages(seed, 60);
        let arena = MessageArena::new(&messages);
        let groups = group_messages(&messages, gap_for(seed));
        let max_size = 1 + (seed as usize % 9);

        let batches = drain_batches(groups, &arena, max_size).unwrap();
        let mut seen = HashSet::new();
        for batch in &batches {
            assert!(!batch.is_empty());
            assert!(batch.len() <= max_size, "seed {} overfilled a batch", seed);
            for id in batch {
                assert!(seen.insert(id.clone()), "seed {} repeated {}", seed, id);
            }
        }
        assert_eq!(seen.len(), messages.len());
    }
}

#[test]
fn test_oversized_group_is_truncated_then_drained() {
    let messages: Vec<Message> = (0..5)
        .map(|i| {
            Message::new(format!("m{}", i), "x", base() + Duration::minutes(i)).in_channel("busy")
        })
        .rev()
        .collect();
    let arena = MessageArena::new(&messages);
    let groups = group_messages(&messages, Duration::seconds(600));

    let first = select_batch(&groups, &arena, 2);
    assert_eq!(first, vec!["m0".to_string(), "m1".to_string()]);

    let batches = drain_batches(groups, &arena, 2).unwrap();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2], vec!["m4".to_string()]);
}

#[test]
fn test_most_recent_conversation_is_selected_first() {
    let messages = vec![
        Message::new("old", "x", base()).in_channel("a"),
        Message::new("new", "y", base() + Duration::hours(1)).in_channel("b"),
    ];
    let arena = MessageArena::new(&messages);
    let groups = group_messages(&messages, Duration::seconds(600));

    assert_eq!(select_batch(&groups, &arena, 1), vec!["new".to_string()]);
    assert!(drain_batches(groups, &arena, 0).is_err());
}
