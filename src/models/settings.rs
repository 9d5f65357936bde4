//! Settings Models
//!
//! Analysis configuration stored in config.json and snapshotted onto each run.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use convo_tasks_core::DEFAULT_IDLE_GAP_SECONDS;

/// Largest accepted idle gap: one week
pub const MAX_IDLE_GAP_SECONDS: i64 = 7 * 24 * 3600;

/// Analysis configuration stored in config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Silence (seconds) after which a channel conversation is split
    #[serde(default = "default_idle_gap_seconds")]
    pub idle_gap_seconds: i64,
    /// Maximum messages handed to the proposal generator per batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Project description passed to the generator with every batch
    #[serde(default)]
    pub project_context: Option<String>,
    /// Capacity of the in-process event channel
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
}

fn default_idle_gap_seconds() -> i64 {
    DEFAULT_IDLE_GAP_SECONDS
}

fn default_max_batch_size() -> usize {
    50
}

fn default_event_buffer_capacity() -> usize {
    256
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            idle_gap_seconds: default_idle_gap_seconds(),
            max_batch_size: default_max_batch_size(),
            project_context: None,
            event_buffer_capacity: default_event_buffer_capacity(),
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub idle_gap_seconds: Option<i64>,
    pub max_batch_size: Option<usize>,
    pub project_context: Option<String>,
    pub event_buffer_capacity: Option<usize>,
}

impl AnalysisConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(gap) = update.idle_gap_seconds {
            self.idle_gap_seconds = gap;
        }
        if let Some(size) = update.max_batch_size {
            self.max_batch_size = size;
        }
        if let Some(context) = update.project_context {
            self.project_context = if context.trim().is_empty() {
                None
            } else {
                Some(context)
            };
        }
        if let Some(capacity) = update.event_buffer_capacity {
            self.event_buffer_capacity = capacity;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_gap_seconds < 1 {
            return Err("idle_gap_seconds must be at least 1 second".to_string());
        }
        if self.idle_gap_seconds > MAX_IDLE_GAP_SECONDS {
            return Err(format!(
                "idle_gap_seconds must be at most {} seconds",
                MAX_IDLE_GAP_SECONDS
            ));
        }
        if self.max_batch_size < 1 {
            return Err("max_batch_size must be at least 1".to_string());
        }
        if self.event_buffer_capacity < 1 {
            return Err("event_buffer_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    /// Idle gap as a duration, clamped to `1..=MAX_IDLE_GAP_SECONDS` for
    /// configs that skipped validation
    pub fn idle_gap(&self) -> Duration {
        let seconds = self.idle_gap_seconds.clamp(1, MAX_IDLE_GAP_SECONDS);
        Duration::try_seconds(seconds)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_IDLE_GAP_SECONDS))
    }

    /// Serialized form stored as a run's config snapshot
    pub fn to_snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Read a config back from a run snapshot; `None` when it is unusable
    pub fn from_snapshot(snapshot: &serde_json::Value) -> Option<Self> {
        let config: Self = serde_json::from_value(snapshot.clone()).ok()?;
        config.validate().ok()?;
        Some(config)
    }
}
