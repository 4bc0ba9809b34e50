//! Streaming transcript ingestor: file -> chunks -> embeddings -> points.
//!
//! One logical pipeline per transcript. Chunks are emitted, embedded,
//! upserted and committed in index order, so a failure at chunk k leaves
//! `[0, k)` persisted and the file unmarked; the idempotent point IDs make
//! full re-ingestion safe.

use crate::clients::qdrant_client::{PointStruct, QdrantClient};
use crate::config::settings::ImportConfig;
use crate::error::{AppError, AppResult};
use crate::models::state::{FileRecord, FileStatus};
use crate::models::transcript::{ChunkPayload, TranscriptMetadata};
use crate::services::chunker::{ChunkReader, MessageChunk, extract_metadata, split_oversized_chunk};
use crate::services::embedding::{EmbeddingKind, EmbeddingProvider, validate_embeddings};
use crate::services::state_store::{StateStore, file_mtime};
use crate::utils::project_normalizer::{chunk_point_id, collection_name, normalize_project_name};
use crate::utils::retry::{DEFAULT_MAX_ATTEMPTS, exhausted_to_file_failed, with_backoff};
use crate::utils::token_estimator::estimate_tokens;
use chrono::Utc;
use log::{debug, error, info};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct ImportService {
    provider: Arc<dyn EmbeddingProvider>,
    qdrant: Arc<QdrantClient>,
    state: Arc<StateStore>,
    config: ImportConfig,
    shutdown: Arc<AtomicBool>,
}

struct PendingChunk {
    index: usize,
    text: String,
    start_role: String,
    message_count: usize,
    message_indices: Vec<usize>,
    token_estimate: usize,
}

struct ConversationContext {
    conversation_id: String,
    project: String,
    timestamp: String,
    metadata: TranscriptMetadata,
}

/// A batch is flushed before adding a chunk that would push its aggregate
/// estimate over the cap; a lone oversized chunk still forms its own batch.
pub(crate) fn should_flush(
    batch_len: usize,
    batch_tokens: usize,
    next_estimate: usize,
    max_tokens: usize,
) -> bool {
    batch_len > 0 && batch_tokens + next_estimate > max_tokens
}

impl ImportService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        qdrant: Arc<QdrantClient>,
        state: Arc<StateStore>,
        config: ImportConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        ImportService {
            provider,
            qdrant,
            state,
            config,
            shutdown,
        }
    }

    /// Ingest a transcript and record the outcome in the state store.
    /// Failures downgrade any previous record to `failed` so the next scan
    /// retries the file.
    pub async fn ingest_and_record(&self, path: &Path) -> AppResult<usize> {
        match self.ingest_file(path).await {
            Ok(chunks) => Ok(chunks),
            Err(e) => {
                error!("Import failed for {}: {}", path.display(), e);
                if let Err(state_err) = self.state.mark_failed(&path.to_string_lossy()).await {
                    error!("Could not record failure state: {}", state_err);
                }
                Err(e)
            }
        }
    }

    /// Full pipeline for one transcript. Returns the number of chunks
    /// imported (0 for an empty transcript, which still counts as
    /// completed).
    pub async fn ingest_file(&self, path: &Path) -> AppResult<usize> {
        let conversation_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::FileFailed(format!("No file stem: {}", path.display())))?;

        let dir_name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let project = normalize_project_name(&dir_name);
        let collection = collection_name(&project, self.provider.collection_suffix());

        let mtime = file_mtime(path)?;

        // The collection's dimension must match the provider's before a
        // single vector is built; a mismatch would corrupt search results
        // across the whole collection.
        let existing_dim = with_backoff("ensure collection", DEFAULT_MAX_ATTEMPTS, || {
            self.qdrant
                .ensure_collection(&collection, self.provider.dimension())
        })
        .await
        .map_err(exhausted_to_file_failed)?;
        if existing_dim != self.provider.dimension() {
            return Err(AppError::FileFailed(format!(
                "Collection {} holds {}d vectors but provider {} produces {}d",
                collection,
                existing_dim,
                self.provider.provider_name(),
                self.provider.dimension()
            )));
        }

        let (metadata, first_timestamp) = extract_metadata(path)?;
        let context = ConversationContext {
            conversation_id,
            project,
            timestamp: first_timestamp,
            metadata,
        };

        let mut reader = ChunkReader::open(path, self.config.max_chunk_size)?;
        let mut batch: Vec<PendingChunk> = Vec::new();
        let mut batch_tokens = 0usize;
        let mut next_index = 0usize;

        while let Some(raw_chunk) = reader.next_chunk()? {
            for piece in split_oversized_chunk(
                raw_chunk,
                self.config.max_tokens_per_batch,
                self.config.token_estimation_ratio,
            ) {
                let pending = self.to_pending(piece, next_index);
                next_index += 1;

                if should_flush(
                    batch.len(),
                    batch_tokens,
                    pending.token_estimate,
                    self.config.max_tokens_per_batch,
                ) {
                    self.flush_batch(&collection, &context, std::mem::take(&mut batch))
                        .await?;
                    batch_tokens = 0;
                    self.check_shutdown()?;
                }

                batch_tokens += pending.token_estimate;
                batch.push(pending);
            }
        }

        if !batch.is_empty() {
            self.flush_batch(&collection, &context, batch).await?;
        }

        if reader.skipped_lines() > 0 {
            debug!(
                "Skipped {} malformed lines in {}",
                reader.skipped_lines(),
                path.display()
            );
        }

        let record = FileRecord {
            imported_at: Utc::now().to_rfc3339(),
            last_modified: mtime,
            chunks: next_index,
            status: FileStatus::Completed,
            collection: collection.clone(),
            has_narrative: None,
            narrative_generated_at: None,
        };
        self.state
            .update_file(&path.to_string_lossy(), record)
            .await?;

        info!(
            "Imported {} chunks from {} into {}",
            next_index,
            path.display(),
            collection
        );
        Ok(next_index)
    }

    fn to_pending(&self, chunk: MessageChunk, index: usize) -> PendingChunk {
        let text = chunk.text();
        let token_estimate = estimate_tokens(&text, self.config.token_estimation_ratio);
        PendingChunk {
            index,
            start_role: chunk.start_role(),
            message_count: chunk.message_count(),
            message_indices: chunk.message_indices(),
            text,
            token_estimate,
        }
    }

    async fn flush_batch(
        &self,
        collection: &str,
        context: &ConversationContext,
        chunks: Vec<PendingChunk>,
    ) -> AppResult<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let total_tokens: usize = chunks.iter().map(|c| c.token_estimate).sum();
        debug!(
            "Embedding batch of {} chunks (~{} tokens) for {}",
            chunks.len(),
            total_tokens,
            context.conversation_id
        );

        let vectors = with_backoff("embed batch", DEFAULT_MAX_ATTEMPTS, || {
            self.provider.embed(EmbeddingKind::Document, &texts)
        })
        .await
        .map_err(exhausted_to_file_failed)?;
        validate_embeddings(&vectors, texts.len(), self.provider.dimension())?;

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let payload = ChunkPayload {
                text: chunk.text.clone(),
                conversation_id: context.conversation_id.clone(),
                chunk_index: chunk.index,
                timestamp: context.timestamp.clone(),
                project: context.project.clone(),
                start_role: chunk.start_role.clone(),
                message_count: chunk.message_count,
                total_messages: context.metadata.total_messages,
                message_index: chunk.message_indices.first().copied().unwrap_or(0),
                message_indices: chunk.message_indices.clone(),
                metadata: context.metadata.clone(),
            };
            points.push(PointStruct {
                id: chunk_point_id(&context.conversation_id, chunk.index),
                vector,
                payload: serde_json::to_value(payload)?,
            });
        }

        with_backoff("upsert points", DEFAULT_MAX_ATTEMPTS, || {
            let points = points.clone();
            async move { self.qdrant.upsert_points(collection, points, false).await }
        })
        .await
        .map_err(exhausted_to_file_failed)?;

        Ok(())
    }

    pub(crate) fn check_shutdown(&self) -> AppResult<()> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(AppError::FileFailed(
                "Ingestion cancelled by shutdown".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::EmbeddingKind;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex as StdMutex;

    /// Deterministic in-process provider for pipeline tests.
    struct StubProvider {
        dimension: usize,
        calls: StdMutex<Vec<usize>>,
    }

    impl StubProvider {
        fn new(dimension: usize) -> Self {
            StubProvider {
                dimension,
                calls: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(
            &self,
            _kind: EmbeddingKind,
            texts: &[String],
        ) -> AppResult<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    (0..self.dimension)
                        .map(|d| ((d + i + 1) as f32).sin())
                        .collect()
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn collection_suffix(&self) -> &'static str {
            "qwen_2048d"
        }

        fn provider_name(&self) -> &'static str {
            "stub"
        }
    }

    fn import_config() -> ImportConfig {
        ImportConfig {
            max_chunk_size: 50,
            max_tokens_per_batch: 100_000,
            token_estimation_ratio: 3,
            max_files_per_cycle: 1000,
            scan_interval_secs: 60,
        }
    }

    fn write_conversation(dir: &Path, project: &str, name: &str, messages: usize) -> std::path::PathBuf {
        let project_dir = dir.join(project);
        std::fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for i in 0..messages {
            writeln!(
                f,
                r#"{{"timestamp":"2025-01-01T00:00:00Z","type":"user","message":{{"role":"user","content":"message number {}"}}}}"#,
                i
            )
            .unwrap();
        }
        path
    }

    async fn service_with_mock(
        server: &mockito::ServerGuard,
        state_dir: &Path,
        dimension: usize,
    ) -> (ImportService, Arc<StateStore>) {
        let provider = Arc::new(StubProvider::new(dimension));
        let qdrant = Arc::new(QdrantClient::new(&server.url(), 5));
        let state = Arc::new(StateStore::open(state_dir.join("state.json")).unwrap());
        let service = ImportService::new(
            provider,
            qdrant,
            state.clone(),
            import_config(),
            Arc::new(AtomicBool::new(false)),
        );
        (service, state)
    }

    async fn mock_collection_lifecycle(
        server: &mut mockito::ServerGuard,
        collection: &str,
        dim: usize,
    ) {
        // Collection exists with the right dimension.
        server
            .mock("GET", format!("/collections/{}", collection).as_str())
            .with_body(format!(
                r#"{{"result":{{"points_count":0,"config":{{"params":{{"vectors":{{"size":{},"distance":"Cosine"}}}}}}}},"status":"ok"}}"#,
                dim
            ))
            .create_async()
            .await;
        server
            .mock(
                "PUT",
                format!("/collections/{}/points?wait=false", collection).as_str(),
            )
            .with_body(r#"{"result":{"operation_id":1,"status":"acknowledged"},"status":"ok"}"#)
            .expect_at_least(1)
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn test_ingest_marks_completed_and_counts_chunks() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let transcript = write_conversation(dir.path(), "-Users-a-projects-my-app", "c1.jsonl", 120);

        // md5("my-app")[:8] scopes the collection.
        let collection = collection_name("my-app", "qwen_2048d");
        mock_collection_lifecycle(&mut server, &collection, 8).await;

        let (service, state) = service_with_mock(&server, dir.path(), 8).await;
        let chunks = service.ingest_file(&transcript).await.unwrap();
        // 120 messages at 50 per chunk.
        assert_eq!(chunks, 3);

        let record = state.get(&transcript.to_string_lossy()).await.unwrap();
        assert_eq!(record.chunks, 3);
        assert_eq!(record.status, FileStatus::Completed);
        assert_eq!(record.collection, collection);
    }

    #[tokio::test]
    async fn test_empty_transcript_completes_with_zero_chunks() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let transcript = write_conversation(dir.path(), "-Users-a-projects-my-app", "c2.jsonl", 0);

        let collection = collection_name("my-app", "qwen_2048d");
        server
            .mock("GET", format!("/collections/{}", collection).as_str())
            .with_body(r#"{"result":{"config":{"params":{"vectors":{"size":8}}}},"status":"ok"}"#)
            .create_async()
            .await;
        // No upsert mock: zero chunks must mean zero upsert calls.

        let (service, state) = service_with_mock(&server, dir.path(), 8).await;
        let chunks = service.ingest_file(&transcript).await.unwrap();
        assert_eq!(chunks, 0);
        let record = state.get(&transcript.to_string_lossy()).await.unwrap();
        assert_eq!(record.status, FileStatus::Completed);
        assert_eq!(record.chunks, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_aborts_before_upsert() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let transcript = write_conversation(dir.path(), "-Users-a-projects-my-app", "c3.jsonl", 5);

        let collection = collection_name("my-app", "qwen_2048d");
        // Existing collection with a different dimension.
        server
            .mock("GET", format!("/collections/{}", collection).as_str())
            .with_body(
                r#"{"result":{"config":{"params":{"vectors":{"size":1024}}}},"status":"ok"}"#,
            )
            .create_async()
            .await;
        let upsert = server
            .mock(
                "PUT",
                format!("/collections/{}/points?wait=false", collection).as_str(),
            )
            .expect(0)
            .create_async()
            .await;

        let (service, state) = service_with_mock(&server, dir.path(), 8).await;
        let err = service.ingest_file(&transcript).await.unwrap_err();
        assert!(matches!(err, AppError::FileFailed(_)));
        assert!(state.get(&transcript.to_string_lossy()).await.is_none());
        upsert.assert_async().await;
    }

    #[test]
    fn test_token_aware_batching_respects_cap() {
        let estimates = [
            5_500usize, 6_600, 7_300, 9_200, 11_000, 12_800, 14_700, 16_500, 18_300, 22_000,
        ];
        let max_tokens = 100_000usize;

        let mut batches: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_tokens = 0usize;
        for est in estimates {
            if should_flush(current.len(), current_tokens, est, max_tokens) {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current_tokens += est;
            current.push(est);
        }
        if !current.is_empty() {
            batches.push(current);
        }

        assert!(batches.len() > 1);
        for batch in &batches {
            assert!(batch.iter().sum::<usize>() <= max_tokens);
        }
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, estimates.len());
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent_via_point_ids() {
        // Point IDs derive only from (conversation_id, chunk_index); two
        // runs over the same file produce identical IDs.
        let ids_run1: Vec<u64> = (0..4).map(|i| chunk_point_id("c1", i)).collect();
        let ids_run2: Vec<u64> = (0..4).map(|i| chunk_point_id("c1", i)).collect();
        assert_eq!(ids_run1, ids_run2);
    }
}
