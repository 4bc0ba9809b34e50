//! On-disk ingestion state: which transcripts have been imported, where,
//! and whether a narrative exists for them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub imported_at: String,
    /// Filesystem mtime (seconds since epoch) captured at import time.
    /// Compared exactly against the current mtime to detect changes.
    pub last_modified: f64,
    pub chunks: usize,
    pub status: FileStatus,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_narrative: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative_generated_at: Option<String>,
}

/// The unified state document: a single mapping from absolute transcript
/// path to its ingestion record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportState {
    #[serde(default)]
    pub files: HashMap<String, FileRecord>,
}

/// A conversation eligible for narrative generation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRef {
    pub id: String,
    pub path: String,
    /// Hash segment extracted from the collection name.
    pub project: String,
    pub collection: String,
    pub chunks: usize,
    pub imported_at: String,
}

/// Scan-level summary of import progress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub total_files: usize,
    pub imported_files: usize,
    pub pending_files: usize,
}
