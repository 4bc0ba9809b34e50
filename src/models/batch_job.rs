//! Local mirror of a remote batch job, persisted one JSON file per job.

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Submitted,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BatchStatus {
    /// Map the remote provider's status vocabulary onto ours.
    pub fn from_remote(remote: &str) -> Self {
        match remote {
            "validating" => BatchStatus::Pending,
            "in_progress" => BatchStatus::InProgress,
            "completed" => BatchStatus::Completed,
            "failed" | "expired" | "cancelled" => BatchStatus::Failed,
            _ => BatchStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobState {
    /// Remote provider's batch id (also the local state file name).
    pub batch_id: String,
    pub input_file_id: String,
    pub local_batch_file: String,
    pub status: BatchStatus,
    pub model: String,
    pub project: Option<String>,
    pub conversations: Vec<String>,
    pub conversations_count: usize,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub completed_count: usize,
    #[serde(default)]
    pub failed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchJobState {
    pub fn new(
        batch_id: String,
        input_file_id: String,
        local_batch_file: String,
        model: String,
        project: Option<String>,
        conversations: Vec<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        BatchJobState {
            batch_id,
            input_file_id,
            local_batch_file,
            status: BatchStatus::Submitted,
            model,
            project,
            conversations_count: conversations.len(),
            conversations,
            progress: 0,
            completed_count: 0,
            failed_count: 0,
            output_file_id: None,
            error_file_id: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }
}

/// Tuning for one backfill run. Values outside the accepted windows are
/// clamped rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub batch_size: usize,
    pub max_batches: usize,
    pub model: String,
    pub delay_between_batches_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        BackfillConfig {
            batch_size: 50,
            max_batches: 10,
            model: "qwen-plus".to_string(),
            delay_between_batches_secs: 60,
        }
    }
}

impl BackfillConfig {
    pub fn clamped(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(5, 100);
        self.max_batches = self.max_batches.clamp(1, 50);
        self.delay_between_batches_secs = self.delay_between_batches_secs.clamp(10, 600);
        self
    }
}

/// Counters for the singleton backfill run, readable while it executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillStatus {
    pub running: bool,
    pub total_candidates: usize,
    pub batches_submitted: usize,
    pub batches_completed: usize,
    pub narratives_stored: usize,
    pub narratives_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_mapping() {
        assert_eq!(BatchStatus::from_remote("validating"), BatchStatus::Pending);
        assert_eq!(
            BatchStatus::from_remote("in_progress"),
            BatchStatus::InProgress
        );
        assert_eq!(
            BatchStatus::from_remote("completed"),
            BatchStatus::Completed
        );
        assert_eq!(BatchStatus::from_remote("failed"), BatchStatus::Failed);
        assert_eq!(BatchStatus::from_remote("expired"), BatchStatus::Failed);
        assert_eq!(BatchStatus::from_remote("cancelled"), BatchStatus::Failed);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&BatchStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_backfill_config_clamping() {
        let cfg = BackfillConfig {
            batch_size: 1,
            max_batches: 500,
            model: "qwen-plus".to_string(),
            delay_between_batches_secs: 3,
        }
        .clamped();
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.max_batches, 50);
        assert_eq!(cfg.delay_between_batches_secs, 10);
    }
}
