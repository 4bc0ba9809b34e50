//! Crash-safe on-disk ingestion state.
//!
//! Single-writer discipline: only the ingestor and the narrative worker
//! mutate the document, both through this handle. Every mutation rewrites
//! the full document via write-to-temp + atomic rename.

use crate::error::AppResult;
use crate::models::state::{FileRecord, FileStatus, ImportState};
use crate::utils::fs::{read_json, write_json_atomic};
use chrono::Utc;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;

pub struct StateStore {
    path: PathBuf,
    state: Mutex<ImportState>,
}

impl StateStore {
    /// Load the state document, tolerating a missing file.
    pub fn open(path: PathBuf) -> AppResult<Self> {
        let state: ImportState = read_json(&path)?.unwrap_or_default();
        info!(
            "Loaded ingestion state with {} tracked files from {}",
            state.files.len(),
            path.display()
        );
        Ok(StateStore {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn snapshot(&self) -> ImportState {
        self.state.lock().await.clone()
    }

    pub async fn tracked_files(&self) -> usize {
        self.state.lock().await.files.len()
    }

    pub async fn get(&self, file_path: &str) -> Option<FileRecord> {
        self.state.lock().await.files.get(file_path).cloned()
    }

    pub async fn update_file(&self, file_path: &str, record: FileRecord) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.files.insert(file_path.to_string(), record);
        write_json_atomic(&self.path, &*state)
    }

    /// Downgrade an existing record to `failed`, leaving its mtime as-is so
    /// the next scan retries the file. Files that never completed an import
    /// have no record and are retried implicitly.
    pub async fn mark_failed(&self, file_path: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.files.get_mut(file_path) {
            record.status = FileStatus::Failed;
            write_json_atomic(&self.path, &*state)?;
        }
        Ok(())
    }

    /// Flag conversations as summarized. Matches records by conversation id
    /// (filename stem).
    pub async fn mark_narratives(&self, conversation_ids: &[String]) -> AppResult<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now().to_rfc3339();
        let mut updated = 0;

        for (file_path, record) in state.files.iter_mut() {
            let conv_id = conversation_stem(file_path);
            if conversation_ids.iter().any(|id| id == &conv_id) {
                record.has_narrative = Some(true);
                record.narrative_generated_at = Some(now.clone());
                updated += 1;
            }
        }

        if updated > 0 {
            write_json_atomic(&self.path, &*state)?;
        }
        info!("Flagged {} conversations as summarized", updated);
        Ok(updated)
    }

    /// A file needs (re-)importing when it has no record or its mtime
    /// changed since the last successful import.
    pub async fn should_import(&self, file_path: &Path) -> bool {
        let key = file_path.to_string_lossy();
        let Some(record) = self.state.lock().await.files.get(key.as_ref()).cloned() else {
            return true;
        };
        match file_mtime(file_path) {
            Ok(mtime) => mtime != record.last_modified,
            Err(_) => true,
        }
    }

    /// Drop records whose source file no longer exists. Returns
    /// `(checked, removed)`. A write failure (e.g. permissions) leaves the
    /// stale records in place and is logged, not fatal.
    pub async fn remove_orphans(&self) -> (usize, usize) {
        let mut state = self.state.lock().await;
        let checked = state.files.len();
        let before = state.files.len();
        state.files.retain(|path, _| Path::new(path).exists());
        let removed = before - state.files.len();

        if removed > 0 {
            if let Err(e) = write_json_atomic(&self.path, &*state) {
                warn!(
                    "Found {} orphaned entries but could not persist cleanup: {}",
                    removed, e
                );
                return (checked, 0);
            }
            info!("Cleanup: removed {} orphaned state entries", removed);
        }
        (checked, removed)
    }
}

/// Conversation id of a transcript path: the filename stem.
pub fn conversation_stem(file_path: &str) -> String {
    Path::new(file_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string())
}

/// Filesystem mtime as fractional seconds since the epoch.
pub fn file_mtime(path: &Path) -> AppResult<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let duration = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0));
    Ok(duration.as_secs_f64())
}
