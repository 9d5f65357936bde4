//! Accuracy Metrics
//!
//! Review-quality figures derived from a run's proposals when it is closed.

use chrono::{DateTime, Utc};

use convo_tasks_core::ReviewRecommendation;

use crate::models::{AccuracyMetrics, ProposalStatus, TaskProposal};

/// Compute accuracy metrics over every proposal of a run
pub fn compute_accuracy_metrics(proposals: &[TaskProposal], now: DateTime<Utc>) -> AccuracyMetrics {
    let total = proposals.len() as i64;
    let count = |status: ProposalStatus| {
        proposals.iter().filter(|p| p.status == status).count() as i64
    };
    let approved = count(ProposalStatus::Approved);
    let rejected = count(ProposalStatus::Rejected);
    let merged = count(ProposalStatus::Merged);

    let rate = |n: i64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

    let decided: Vec<&TaskProposal> = proposals
        .iter()
        .filter(|p| matches!(p.status, ProposalStatus::Approved | ProposalStatus::Rejected))
        .collect();
    let agreeing = decided
        .iter()
        .filter(|p| {
            matches!(
                (p.status, p.llm_recommendation),
                (ProposalStatus::Approved, ReviewRecommendation::Approve)
                    | (ProposalStatus::Rejected, ReviewRecommendation::Reject)
            )
        })
        .count();

    AccuracyMetrics {
        total_proposals: total,
        approved,
        rejected,
        merged,
        approval_rate: rate(approved),
        rejection_rate: rate(rejected),
        merge_rate: rate(merged),
        average_confidence: mean(proposals.iter().map(|p| p.confidence)).unwrap_or(0.0),
        average_confidence_approved: mean(
            proposals
                .iter()
                .filter(|p| p.status == ProposalStatus::Approved)
                .map(|p| p.confidence),
        ),
        average_confidence_rejected: mean(
            proposals
                .iter()
                .filter(|p| p.status == ProposalStatus::Rejected)
                .map(|p| p.confidence),
        ),
        recommendation_agreement_rate: if decided.is_empty() {
            None
        } else {
            Some(agreeing as f64 / decided.len() as f64)
        },
        computed_at: now,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
