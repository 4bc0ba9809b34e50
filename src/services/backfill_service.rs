//! Backfill orchestrator: a stoppable, bounded sweep that generates
//! narratives for every eligible conversation.
//!
//! Single in-flight batch at a time. `stop()` is cooperative: the current
//! batch is allowed to finish, the next submission never happens.

use crate::error::{AppError, AppResult};
use crate::models::batch_job::{BackfillConfig, BackfillStatus, BatchStatus};
use crate::models::state::ConversationRef;
use crate::services::batch_service::NarrativeBatchService;
use crate::services::narrative_service::NarrativeService;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, sleep};

/// A batch that shows no terminal state within this window is declared
/// failed locally.
const BATCH_WAIT_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

pub struct BackfillService {
    batches: Arc<NarrativeBatchService>,
    narratives: Arc<NarrativeService>,
    run: Mutex<BackfillStatus>,
    stop_requested: AtomicBool,
    poll_interval: Duration,
    newest_first: bool,
}

impl BackfillService {
    pub fn new(
        batches: Arc<NarrativeBatchService>,
        narratives: Arc<NarrativeService>,
        poll_interval_secs: u64,
        newest_first: bool,
    ) -> Self {
        BackfillService {
            batches,
            narratives,
            run: Mutex::new(BackfillStatus::default()),
            stop_requested: AtomicBool::new(false),
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            newest_first,
        }
    }

    /// Start the singleton run. Rejects with `Conflict` while one is
    /// already active.
    pub async fn start(self: &Arc<Self>, config: BackfillConfig) -> AppResult<()> {
        {
            let mut run = self.run.lock().await;
            if run.running {
                return Err(AppError::Conflict(
                    "Backfill is already running".to_string(),
                ));
            }
            *run = BackfillStatus {
                running: true,
                started_at: Some(Utc::now().to_rfc3339()),
                ..Default::default()
            };
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_loop(config.clamped()).await;
        });
        Ok(())
    }

    /// Request a cooperative stop; observed before the next submission.
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        info!("Backfill stop requested");
    }

    pub async fn status(&self) -> BackfillStatus {
        self.run.lock().await.clone()
    }

    async fn run_loop(self: Arc<Self>, config: BackfillConfig) {
        info!(
            "Backfill starting: batch_size={}, max_batches={}, model={}, delay={}s",
            config.batch_size,
            config.max_batches,
            config.model,
            config.delay_between_batches_secs
        );

        let candidates = self
            .batches
            .candidates(None, config.batch_size * config.max_batches, self.newest_first)
            .await;
        {
            let mut run = self.run.lock().await;
            run.total_candidates = candidates.len();
        }
        info!("Backfill found {} candidate conversations", candidates.len());

        for (i, slice) in candidates.chunks(config.batch_size).enumerate() {
            if i >= config.max_batches {
                break;
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                info!("Backfill stopping before batch {}", i + 1);
                break;
            }

            match self.process_batch(slice, &config.model).await {
                Ok((stored, failed)) => {
                    let mut run = self.run.lock().await;
                    run.batches_completed += 1;
                    run.narratives_stored += stored;
                    run.narratives_failed += failed;
                }
                Err(e) => {
                    error!("Backfill batch {} failed: {}", i + 1, e);
                    let mut run = self.run.lock().await;
                    run.last_error = Some(e.to_string());
                }
            }

            let more_batches = (i + 1) < config.max_batches
                && (i + 1) * config.batch_size < candidates.len();
            if more_batches && !self.stop_requested.load(Ordering::SeqCst) {
                sleep(Duration::from_secs(config.delay_between_batches_secs)).await;
            }
        }

        let mut run = self.run.lock().await;
        run.running = false;
        run.finished_at = Some(Utc::now().to_rfc3339());
        info!(
            "Backfill finished: {} batches, {} narratives stored, {} failed",
            run.batches_completed, run.narratives_stored, run.narratives_failed
        );
    }

    /// Submit one batch, poll it to a terminal state, and store its
    /// narratives. Returns `(stored, failed)` counts.
    async fn process_batch(
        &self,
        conversations: &[ConversationRef],
        model: &str,
    ) -> AppResult<(usize, usize)> {
        let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
        let project = single_project(conversations);

        let job = self
            .batches
            .submit_batch(&ids, project.clone(), model)
            .await?;
        {
            let mut run = self.run.lock().await;
            run.batches_submitted += 1;
        }

        let final_status = self.wait_for_batch(&job.batch_id).await?;
        if final_status != BatchStatus::Completed {
            return Err(AppError::ProviderFatal(format!(
                "Batch {} ended as {:?}",
                job.batch_id, final_status
            )));
        }

        let results = self.batches.fetch_results(&job.batch_id).await?;
        let mut stored = 0usize;
        let mut failed = 0usize;
        for result in results {
            let Some(narrative) = result.narrative else {
                warn!(
                    "Narrative generation failed for {}: {}",
                    result.conversation_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                failed += 1;
                continue;
            };
            let project_name = project.clone().unwrap_or_else(|| "default".to_string());
            match self
                .narratives
                .store_narrative(
                    &result.conversation_id,
                    &project_name,
                    &narrative,
                    result.tokens_used,
                )
                .await
            {
                Ok(_) => stored += 1,
                Err(e) => {
                    error!(
                        "Failed to store narrative for {}: {}",
                        result.conversation_id, e
                    );
                    failed += 1;
                }
            }
        }

        info!(
            "Batch {}: stored {} narratives, {} failed",
            job.batch_id, stored, failed
        );
        Ok((stored, failed))
    }

    /// Poll the remote batch every `poll_interval` until terminal or the
    /// 24h bound elapses. The in-flight batch is polled to completion even
    /// when a stop was requested.
    async fn wait_for_batch(&self, batch_id: &str) -> AppResult<BatchStatus> {
        let deadline = Instant::now() + BATCH_WAIT_LIMIT;

        loop {
            match self.batches.poll_job(batch_id).await {
                Ok(job) => {
                    info!(
                        "Batch {}: status={:?}, progress={}%",
                        batch_id, job.status, job.progress
                    );
                    if job.status.is_terminal() {
                        return Ok(job.status);
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("Error polling batch {}: {}", batch_id, e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(AppError::ProviderFatal(format!(
                    "Batch {} made no progress within 24h",
                    batch_id
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Periodic worker mode: every `check_interval`, submit one batch when
    /// enough candidates have accumulated. Used by the long-running binary;
    /// `start`/`stop` drive ad-hoc sweeps.
    pub async fn run_worker(
        self: Arc<Self>,
        batch_size: usize,
        min_batch: usize,
        model: String,
        check_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "Narrative worker started: batch_size={}, min_batch={}, model={}",
            batch_size, min_batch, model
        );

        loop {
            let candidates = self.batches.candidates(None, batch_size, self.newest_first).await;
            if candidates.len() >= min_batch {
                if let Err(e) = self.process_batch(&candidates, &model).await {
                    error!("Worker batch failed: {}", e);
                    let mut run = self.run.lock().await;
                    run.last_error = Some(e.to_string());
                }
            } else {
                info!(
                    "Not enough conversations for a batch ({} < {})",
                    candidates.len(),
                    min_batch
                );
            }

            tokio::select! {
                _ = sleep(check_interval) => {}
                _ = shutdown.changed() => {
                    info!("Narrative worker shutting down");
                    return;
                }
            }
        }
    }
}

/// The batch's project when all conversations agree; `None` for a mixed
/// batch (narratives then land under the "default" project).
fn single_project(conversations: &[ConversationRef]) -> Option<String> {
    let mut projects: Vec<&str> = conversations
        .iter()
        .map(|c| c.project.as_str())
        .filter(|p| !p.is_empty())
        .collect();
    projects.sort_unstable();
    projects.dedup();
    match projects.as_slice() {
        [only] => Some((*only).to_string()),
        _ => None,
    }
}
