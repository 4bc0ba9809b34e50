//! Periodic transcript scanner driving the streaming ingestor.
//!
//! Enumerates `<logs_dir>/<project>/*.jsonl` every scan interval and
//! ingests whatever the state store reports as new or changed. Files are
//! processed sequentially to preserve the per-file memory bound.

use crate::models::state::ImportSummary;
use crate::services::import_service::ImportService;
use crate::services::state_store::StateStore;
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub scanned: usize,
    pub imported: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct WatcherService {
    import: Arc<ImportService>,
    state: Arc<StateStore>,
    logs_dir: PathBuf,
    scan_interval: Duration,
    max_files_per_cycle: usize,
}

impl WatcherService {
    pub fn new(
        import: Arc<ImportService>,
        state: Arc<StateStore>,
        logs_dir: PathBuf,
        scan_interval_secs: u64,
        max_files_per_cycle: usize,
    ) -> Self {
        WatcherService {
            import,
            state,
            logs_dir,
            scan_interval: Duration::from_secs(scan_interval_secs.max(1)),
            max_files_per_cycle: max_files_per_cycle.max(1),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Watcher started: scanning {} every {:?}",
            self.logs_dir.display(),
            self.scan_interval
        );

        loop {
            let stats = self.scan_once().await;
            if stats.imported > 0 || stats.failed > 0 {
                info!(
                    "Scan cycle: {} scanned, {} imported, {} failed, {} unchanged",
                    stats.scanned, stats.imported, stats.failed, stats.skipped
                );
            }

            tokio::select! {
                _ = sleep(self.scan_interval) => {}
                _ = shutdown.changed() => {
                    info!("Watcher shutting down");
                    return;
                }
            }
        }
    }

    /// One scan cycle over the transcript root. Per-file failures are
    /// recorded and do not stop the cycle.
    pub async fn scan_once(&self) -> ScanStats {
        let mut stats = ScanStats::default();

        let files = match self.enumerate_transcripts() {
            Ok(files) => files,
            Err(e) => {
                error!(
                    "Cannot enumerate transcripts under {}: {}",
                    self.logs_dir.display(),
                    e
                );
                return stats;
            }
        };

        for file in files {
            stats.scanned += 1;
            if !self.state.should_import(&file).await {
                stats.skipped += 1;
                continue;
            }
            match self.import.ingest_and_record(&file).await {
                Ok(_) => stats.imported += 1,
                Err(_) => stats.failed += 1,
            }
        }
        stats
    }

    /// Progress snapshot: transcripts on disk vs. tracked in state.
    pub async fn import_summary(&self) -> ImportSummary {
        let total_files = self
            .enumerate_transcripts()
            .map(|files| files.len())
            .unwrap_or(0);
        let imported_files = self.state.tracked_files().await;
        ImportSummary {
            total_files,
            imported_files,
            pending_files: total_files.saturating_sub(imported_files),
        }
    }

    /// `<logs_dir>/<project>/*.jsonl`, sorted for deterministic order and
    /// capped per cycle so a cold start stays bounded.
    fn enumerate_transcripts(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut project_dirs: Vec<PathBuf> = std::fs::read_dir(&self.logs_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        project_dirs.sort();

        let mut files = Vec::new();
        'outer: for dir in project_dirs {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping unreadable project dir {}: {}", dir.display(), e);
                    continue;
                }
            };
            let mut transcripts: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("jsonl"))
                .collect();
            transcripts.sort();

            for transcript in transcripts {
                files.push(transcript);
                if files.len() >= self.max_files_per_cycle {
                    break 'outer;
                }
            }
        }
        Ok(files)
    }
}
