//! Batch Selection
//!
//! Picks a bounded subset of grouped messages for one generator call.
//! Groups are ranked by recency (latest `sent_at` first) and packed whole,
//! first-fit, up to `max_size`. A group that is larger than `max_size` on its
//! own is truncated to its earliest messages and returned alone once it reaches
//! the front of the ranking, so nothing is ever dropped.
//!
//! Selection is pure. Callers remove the returned ids from the groups before
//! selecting again; [`drain_batches`] does exactly that.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::conversation::ConversationGroups;
use crate::error::{CoreError, CoreResult};
use crate::message::{MessageArena, MessageId};

/// Select the ids for the next batch. Never returns more than `max_size` ids.
pub fn select_batch(
    groups: &ConversationGroups,
    arena: &MessageArena<'_>,
    max_size: usize,
) -> Vec<MessageId> {
    if max_size == 0 {
        return Vec::new();
    }

    let mut batch: Vec<MessageId> = Vec::new();
    for (_, ids) in rank_by_recency(groups, arena) {
        if batch.len() + ids.len() <= max_size {
            batch.extend(ids.iter().cloned());
        } else if batch.is_empty() {
            return earliest(ids, arena, max_size);
        }
        if batch.len() == max_size {
            break;
        }
    }
    batch
}

/// Repeatedly select and remove batches until no grouped message remains.
///
/// Returns the batches in processing order.
pub fn drain_batches(
    mut groups: ConversationGroups,
    arena: &MessageArena<'_>,
    max_size: usize,
) -> CoreResult<Vec<Vec<MessageId>>> {
    if max_size == 0 {
        return Err(CoreError::validation("Batch size must be at least 1"));
    }

    let mut batches = Vec::new();
    while !groups.is_empty() {
        let batch = select_batch(&groups, arena, max_size);
        if batch.is_empty() {
            return Err(CoreError::internal(format!(
                "Batch selection made no progress with {} messages left",
                groups.total_messages()
            )));
        }
        groups.remove_messages(&batch);
        batches.push(batch);
    }
    Ok(batches)
}

/// Groups ordered by their latest message, newest first; ties by key.
fn rank_by_recency<'g>(
    groups: &'g ConversationGroups,
    arena: &MessageArena<'_>,
) -> Vec<(&'g str, &'g [MessageId])> {
    let mut ranked: Vec<(&str, &[MessageId], DateTime<Utc>)> = groups
        .iter()
        .map(|(key, ids)| (key, ids, latest_sent_at(ids, arena)))
        .collect();
    ranked.sort_by(|a, b| match b.2.cmp(&a.2) {
        Ordering::Equal => a.0.cmp(b.0),
        other => other,
    });
    ranked.into_iter().map(|(key, ids, _)| (key, ids)).collect()
}

fn latest_sent_at(ids: &[MessageId], arena: &MessageArena<'_>) -> DateTime<Utc> {
    ids.iter()
        .filter_map(|id| arena.sent_at(id))
        .max()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The `limit` earliest ids of a group by `sent_at`, in chronological order.
fn earliest(ids: &[MessageId], arena: &MessageArena<'_>, limit: usize) -> Vec<MessageId> {
    let mut ordered: Vec<&MessageId> = ids.iter().collect();
    ordered.sort_by_key(|id| arena.sent_at(id).unwrap_or(DateTime::<Utc>::MIN_UTC));
    ordered.into_iter().take(limit).cloned().collect()
}
