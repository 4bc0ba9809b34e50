//! Narrative batch pipeline: candidate selection, remote batch submission,
//! polling, and result parsing.

use crate::clients::batch_api_client::BatchApiClient;
use crate::error::{AppError, AppResult};
use crate::models::batch_job::{BatchJobState, BatchStatus};
use crate::models::narrative::{BatchResultEntry, Narrative};
use crate::models::state::{ConversationRef, FileStatus};
use crate::services::state_store::{StateStore, conversation_stem};
use crate::utils::fs::{read_json, write_json_atomic};
use crate::utils::project_normalizer::{normalize_project_name, project_hash};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Conversations beyond this many characters are truncated before being
/// packed into a batch request (roughly 100k tokens of context).
const MAX_CONVERSATION_CHARS: usize = 400_000;
const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED]";

const SYSTEM_PROMPT: &str = "You are a technical analyst that generates structured JSON summaries \
of development conversations. Always respond with valid JSON only.";

const NARRATIVE_PROMPT_HEADER: &str = "Analyze this conversation between a developer and an AI \
coding assistant. Generate a structured narrative that captures the essence of the work done.";

const NARRATIVE_PROMPT_FOOTER: &str = r#"Generate a JSON response with the following structure:
{
  "summary": "A 2-3 sentence executive summary of what was accomplished",
  "problem": "The initial problem or objective (if any)",
  "solution": "The solution implemented (if any)",
  "decisions": ["List of key technical decisions made"],
  "files_modified": ["List of files created or modified"],
  "key_insights": ["Important learnings or patterns identified"],
  "tags": ["Relevant tags for semantic search"],
  "complexity": "low|medium|high",
  "outcome": "success|partial|failed|ongoing"
}

Important:
- Be concise but comprehensive
- Focus on technical details and decisions
- Extract file paths mentioned in the conversation
- Identify patterns that could help future development
- Generate tags that would help find this conversation later

Respond ONLY with valid JSON, no additional text."#;

pub struct NarrativeBatchService {
    client: BatchApiClient,
    state: Arc<StateStore>,
    batch_state_dir: PathBuf,
    batch_files_dir: PathBuf,
}

impl NarrativeBatchService {
    pub fn new(
        client: BatchApiClient,
        state: Arc<StateStore>,
        batch_state_dir: PathBuf,
        batch_files_dir: PathBuf,
    ) -> Self {
        NarrativeBatchService {
            client,
            state,
            batch_state_dir,
            batch_files_dir,
        }
    }

    /// Conversations eligible for narrative generation: imported completely,
    /// not yet summarized, non-empty, and still present on disk.
    pub async fn candidates(
        &self,
        project: Option<&str>,
        limit: usize,
        newest_first: bool,
    ) -> Vec<ConversationRef> {
        let snapshot = self.state.snapshot().await;
        let target_hash = project.map(|p| project_hash(&normalize_project_name(p)));

        let mut conversations: Vec<ConversationRef> = Vec::new();
        for (file_path, record) in snapshot.files {
            if record.has_narrative == Some(true) {
                continue;
            }
            if record.status != FileStatus::Completed {
                continue;
            }
            if record.chunks == 0 {
                continue;
            }
            if !Path::new(&file_path).exists() {
                continue;
            }

            let hash_segment = record
                .collection
                .strip_prefix("conv_")
                .and_then(|rest| rest.split('_').next())
                .unwrap_or_default()
                .to_string();

            if let Some(target) = &target_hash {
                if &hash_segment != target {
                    continue;
                }
            }

            conversations.push(ConversationRef {
                id: conversation_stem(&file_path),
                path: file_path,
                project: hash_segment,
                collection: record.collection,
                chunks: record.chunks,
                imported_at: record.imported_at,
            });
        }

        conversations.sort_by(|a, b| {
            if newest_first {
                b.imported_at.cmp(&a.imported_at)
            } else {
                a.imported_at.cmp(&b.imported_at)
            }
        });
        conversations.truncate(limit);
        conversations
    }

    /// Build the JSONL request file, upload it, create the remote batch,
    /// and persist the local job state.
    pub async fn submit_batch(
        &self,
        conversation_ids: &[String],
        project: Option<String>,
        model: &str,
    ) -> AppResult<BatchJobState> {
        let (batch_file, included) = self.prepare_batch_file(conversation_ids, model).await?;

        let input_file_id = self.client.upload_file(&batch_file).await?;
        info!(
            "Uploaded batch file with {} requests, file id {}",
            included.len(),
            input_file_id
        );

        let remote = self.client.create_batch(&input_file_id, model).await?;
        let job = BatchJobState::new(
            remote.id,
            input_file_id,
            batch_file.to_string_lossy().into_owned(),
            model.to_string(),
            project,
            included,
        );
        self.persist_job(&job)?;
        info!(
            "Created batch {} with {} conversations",
            job.batch_id, job.conversations_count
        );
        Ok(job)
    }

    /// Refresh a job from the remote side and persist the translated state.
    pub async fn poll_job(&self, batch_id: &str) -> AppResult<BatchJobState> {
        let mut job = self.get_job(batch_id)?;

        let remote = match self.client.get_batch(batch_id).await {
            Ok(remote) => remote,
            Err(e) => {
                job.error = Some(e.to_string());
                job.touch();
                self.persist_job(&job)?;
                return Err(e);
            }
        };

        job.status = BatchStatus::from_remote(&remote.status);
        if let Some(counts) = &remote.request_counts {
            if counts.total > 0 {
                job.progress = ((counts.completed * 100) / counts.total).min(100) as u8;
                job.completed_count = counts.completed as usize;
                job.failed_count = counts.failed as usize;
            }
        }
        if job.status == BatchStatus::Completed {
            job.completed_at = Some(Utc::now().to_rfc3339());
            job.output_file_id = remote.output_file_id;
            job.error_file_id = remote.error_file_id;
        }
        job.touch();
        self.persist_job(&job)?;
        Ok(job)
    }

    /// Download and parse the output file of a completed batch.
    pub async fn fetch_results(&self, batch_id: &str) -> AppResult<Vec<BatchResultEntry>> {
        let job = self.get_job(batch_id)?;
        if job.status != BatchStatus::Completed {
            return Err(AppError::Conflict(format!(
                "Batch {} not completed: {:?}",
                batch_id, job.status
            )));
        }
        let output_file_id = job
            .output_file_id
            .ok_or_else(|| AppError::NotFound("No output file available".to_string()))?;

        let content = self.client.download_file(&output_file_id).await?;

        let mut results = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_result_line(line) {
                Ok(entry) => results.push(entry),
                Err(e) => error!("Error parsing batch result line: {}", e),
            }
        }
        Ok(results)
    }

    pub async fn cancel_job(&self, batch_id: &str) -> AppResult<BatchJobState> {
        let mut job = self.get_job(batch_id)?;
        self.client.cancel_batch(batch_id).await?;
        job.status = BatchStatus::Failed;
        job.error = Some("Cancelled".to_string());
        job.touch();
        self.persist_job(&job)?;
        Ok(job)
    }

    pub fn get_job(&self, batch_id: &str) -> AppResult<BatchJobState> {
        read_json(&self.job_state_path(batch_id))?
            .ok_or_else(|| AppError::NotFound(format!("Batch job not found: {}", batch_id)))
    }

    /// All locally known jobs, newest first.
    pub fn list_jobs(&self, limit: usize) -> Vec<BatchJobState> {
        let mut jobs = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.batch_state_dir) else {
            return jobs;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<BatchJobState>(&path) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("Error reading job state {}: {}", path.display(), e),
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    async fn prepare_batch_file(
        &self,
        conversation_ids: &[String],
        model: &str,
    ) -> AppResult<(PathBuf, Vec<String>)> {
        std::fs::create_dir_all(&self.batch_files_dir)?;

        let snapshot = self.state.snapshot().await;
        let mut requests = Vec::new();
        let mut included = Vec::new();

        for conv_id in conversation_ids {
            let Some(file_path) = snapshot.files.iter().find_map(|(path, record)| {
                (record.status == FileStatus::Completed && conversation_stem(path) == *conv_id)
                    .then(|| path.clone())
            }) else {
                warn!("Conversation not found in state: {}", conv_id);
                continue;
            };
            if !Path::new(&file_path).exists() {
                warn!("Conversation file missing on disk: {}", file_path);
                continue;
            }

            let content = match load_conversation_text(Path::new(&file_path)) {
                Ok(c) if !c.is_empty() => c,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Error loading conversation {}: {}", file_path, e);
                    continue;
                }
            };

            requests.push(build_request_line(conv_id, &content, model));
            included.push(conv_id.clone());
        }

        if requests.is_empty() {
            return Err(AppError::Validation(
                "No valid conversations found for batch processing".to_string(),
            ));
        }

        let file_name = format!(
            "batch_{}_{}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let batch_file = self.batch_files_dir.join(file_name);

        let mut body = String::new();
        for request in &requests {
            body.push_str(&serde_json::to_string(request)?);
            body.push('\n');
        }
        std::fs::write(&batch_file, body)?;

        info!(
            "Created batch file with {} requests: {}",
            requests.len(),
            batch_file.display()
        );
        Ok((batch_file, included))
    }

    fn persist_job(&self, job: &BatchJobState) -> AppResult<()> {
        write_json_atomic(&self.job_state_path(&job.batch_id), job)
    }

    fn job_state_path(&self, batch_id: &str) -> PathBuf {
        self.batch_state_dir.join(format!("{}.json", batch_id))
    }
}

/// Flatten a transcript into `[role]: content` blocks for the prompt,
/// truncated at the provider context budget.
pub fn load_conversation_text(path: &Path) -> AppResult<String> {
    use std::io::BufRead;

    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut blocks = Vec::new();
    let mut total_len = 0usize;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        let role = value
            .get("type")
            .and_then(Value::as_str)
            .or_else(|| value.get("role").and_then(Value::as_str))
            .unwrap_or("unknown");

        let content = flatten_content(
            value
                .get("message")
                .or_else(|| value.get("content"))
                .unwrap_or(&Value::Null),
        );
        if content.is_empty() {
            continue;
        }

        let block = format!("[{}]: {}", role, content);
        total_len += block.len() + 2;
        blocks.push(block);

        if total_len > MAX_CONVERSATION_CHARS + 4096 {
            // Already past the cap; no point reading further.
            break;
        }
    }

    let mut text = blocks.join("\n\n");
    if text.len() > MAX_CONVERSATION_CHARS {
        let mut cut = MAX_CONVERSATION_CHARS;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(TRUNCATION_MARKER);
    }
    Ok(text)
}

fn flatten_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("content") {
            Some(inner) => flatten_content(inner),
            None => String::new(),
        },
        Value::Array(items) => {
            let texts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    item.get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| item.as_str().map(str::to_string))
                })
                .collect();
            texts.join("\n")
        }
        _ => String::new(),
    }
}

fn build_request_line(conv_id: &str, conversation_content: &str, model: &str) -> Value {
    let user_prompt = format!(
        "{}\n\n<conversation>\n{}\n</conversation>\n\n{}",
        NARRATIVE_PROMPT_HEADER, conversation_content, NARRATIVE_PROMPT_FOOTER
    );
    json!({
        "custom_id": conv_id,
        "method": "POST",
        "url": "/v1/chat/completions",
        "body": {
            "model": model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.3,
            "response_format": {"type": "json_object"}
        }
    })
}

fn parse_result_line(line: &str) -> AppResult<BatchResultEntry> {
    let value: Value = serde_json::from_str(line)?;
    let conversation_id = value
        .get("custom_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let response = value.get("response").cloned().unwrap_or(Value::Null);
    let status_code = response
        .get("status_code")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    if status_code != 200 {
        let error = response
            .get("error")
            .map(|e| match e.as_str() {
                Some(s) => s.to_string(),
                None => e.to_string(),
            })
            .unwrap_or_else(|| format!("Unexpected status code {}", status_code));
        return Ok(BatchResultEntry {
            conversation_id,
            narrative: None,
            tokens_used: None,
            error: Some(error),
        });
    }

    let body = response.get("body").cloned().unwrap_or(Value::Null);
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or("{}");

    match serde_json::from_str::<Narrative>(content) {
        Ok(narrative) => Ok(BatchResultEntry {
            conversation_id,
            narrative: Some(narrative),
            tokens_used: body.get("usage").cloned(),
            error: None,
        }),
        Err(e) => Ok(BatchResultEntry {
            conversation_id,
            narrative: None,
            tokens_used: body.get("usage").cloned(),
            error: Some(format!("Model response was not a valid narrative: {}", e)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::narrative::Outcome;
    use crate::models::state::FileRecord;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn record(collection: &str, imported_at: &str, chunks: usize) -> FileRecord {
        FileRecord {
            imported_at: imported_at.to_string(),
            last_modified: 1.0,
            chunks,
            status: FileStatus::Completed,
            collection: collection.to_string(),
            has_narrative: None,
            narrative_generated_at: None,
        }
    }

    async fn service_with(
        server: &mockito::ServerGuard,
        dir: &Path,
    ) -> (NarrativeBatchService, Arc<StateStore>) {
        let state = Arc::new(StateStore::open(dir.join("state.json")).unwrap());
        let service = NarrativeBatchService::new(
            BatchApiClient::new("test-key", &server.url()),
            state.clone(),
            dir.join("batch_state"),
            dir.join("batch_files"),
        );
        (service, state)
    }

    fn write_transcript(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"{{"type":"user","message":{{"role":"user","content":"fix the flaky test"}}}}"#
        )
        .unwrap();
        writeln!(
            f,
            r#"{{"type":"assistant","message":{{"role":"assistant","content":[{{"type":"text","text":"done, it was a race"}}]}}}}"#
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_candidate_selection_filters() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, state) = service_with(&server, dir.path()).await;

        let present = write_transcript(dir.path(), "present.jsonl");
        state
            .update_file(
                &present.to_string_lossy(),
                record("conv_7f6df0fc_qwen_2048d", "2025-01-02T00:00:00Z", 3),
            )
            .await
            .unwrap();

        // Already summarized.
        let summarized = write_transcript(dir.path(), "summarized.jsonl");
        let mut rec = record("conv_7f6df0fc_qwen_2048d", "2025-01-03T00:00:00Z", 3);
        rec.has_narrative = Some(true);
        state
            .update_file(&summarized.to_string_lossy(), rec)
            .await
            .unwrap();

        // Empty conversation.
        let empty = write_transcript(dir.path(), "empty.jsonl");
        state
            .update_file(
                &empty.to_string_lossy(),
                record("conv_7f6df0fc_qwen_2048d", "2025-01-04T00:00:00Z", 0),
            )
            .await
            .unwrap();

        // File deleted from disk.
        state
            .update_file(
                "/nowhere/ghost.jsonl",
                record("conv_7f6df0fc_qwen_2048d", "2025-01-05T00:00:00Z", 2),
            )
            .await
            .unwrap();

        let candidates = service.candidates(None, 100, true).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "present");
        assert_eq!(candidates[0].project, "7f6df0fc");
    }

    #[tokio::test]
    async fn test_candidates_project_filter_and_order() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, state) = service_with(&server, dir.path()).await;

        for (name, collection, at) in [
            ("a.jsonl", "conv_7f6df0fc_qwen_2048d", "2025-01-01T00:00:00Z"),
            ("b.jsonl", "conv_7f6df0fc_qwen_2048d", "2025-01-03T00:00:00Z"),
            ("c.jsonl", "conv_9f2f312b_qwen_2048d", "2025-01-02T00:00:00Z"),
        ] {
            let path = write_transcript(dir.path(), name);
            state
                .update_file(&path.to_string_lossy(), record(collection, at, 1))
                .await
                .unwrap();
        }

        // "claude-self-reflect" hashes to 7f6df0fc.
        let candidates = service
            .candidates(Some("claude-self-reflect"), 10, true)
            .await;
        assert_eq!(candidates.len(), 2);
        // Newest first.
        assert_eq!(candidates[0].id, "b");
        assert_eq!(candidates[1].id, "a");
    }

    #[tokio::test]
    async fn test_submit_poll_fetch_happy_path() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, state) = service_with(&server, dir.path()).await;

        for name in ["c1.jsonl", "c2.jsonl", "c3.jsonl"] {
            let path = write_transcript(dir.path(), name);
            state
                .update_file(
                    &path.to_string_lossy(),
                    record("conv_7f6df0fc_qwen_2048d", "2025-01-01T00:00:00Z", 2),
                )
                .await
                .unwrap();
        }

        let _upload = server
            .mock("POST", "/files")
            .with_body(r#"{"id":"file-in"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/batches")
            .with_body(r#"{"id":"batch-1","status":"validating"}"#)
            .create_async()
            .await;

        let ids: Vec<String> = ["c1", "c2", "c3"].iter().map(|s| s.to_string()).collect();
        let job = service
            .submit_batch(&ids, Some("claude-self-reflect".to_string()), "qwen-plus")
            .await
            .unwrap();
        assert_eq!(job.status, BatchStatus::Submitted);
        assert_eq!(job.conversations_count, 3);

        // Remote progresses: validating -> in_progress -> completed.
        let _poll1 = server
            .mock("GET", "/batches/batch-1")
            .with_body(r#"{"id":"batch-1","status":"validating"}"#)
            .expect(1)
            .create_async()
            .await;
        let polled = service.poll_job("batch-1").await.unwrap();
        assert_eq!(polled.status, BatchStatus::Pending);

        let _poll2 = server
            .mock("GET", "/batches/batch-1")
            .with_body(
                r#"{"id":"batch-1","status":"in_progress","request_counts":{"total":3,"completed":2,"failed":0}}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let polled = service.poll_job("batch-1").await.unwrap();
        assert_eq!(polled.status, BatchStatus::InProgress);
        assert_eq!(polled.progress, 66);

        let _poll3 = server
            .mock("GET", "/batches/batch-1")
            .with_body(
                r#"{"id":"batch-1","status":"completed","output_file_id":"file-out","request_counts":{"total":3,"completed":3,"failed":0}}"#,
            )
            .create_async()
            .await;
        let polled = service.poll_job("batch-1").await.unwrap();
        assert_eq!(polled.status, BatchStatus::Completed);
        assert_eq!(polled.output_file_id.as_deref(), Some("file-out"));

        // Output file: two good narratives, one model failure.
        let narrative = r#"{\"summary\":\"Fixed a race\",\"outcome\":\"success\",\"complexity\":\"low\"}"#;
        let output = format!(
            "{}\n{}\n{}\n",
            format!(
                r#"{{"custom_id":"c1","response":{{"status_code":200,"body":{{"choices":[{{"message":{{"content":"{}"}}}}],"usage":{{"total_tokens":900}}}}}}}}"#,
                narrative
            ),
            format!(
                r#"{{"custom_id":"c2","response":{{"status_code":200,"body":{{"choices":[{{"message":{{"content":"{}"}}}}]}}}}}}"#,
                narrative
            ),
            r#"{"custom_id":"c3","response":{"status_code":500,"error":"upstream overloaded"}}"#
        );
        let _download = server
            .mock("GET", "/files/file-out/content")
            .with_body(output)
            .create_async()
            .await;

        let results = service.fetch_results("batch-1").await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].narrative.as_ref().unwrap().outcome,
            Outcome::Success
        );
        assert!(results[0].tokens_used.is_some());
        assert!(results[1].narrative.is_some());
        assert!(results[2].narrative.is_none());
        assert!(results[2].error.is_some());
    }

    #[tokio::test]
    async fn test_fetch_results_requires_completed() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, _state) = service_with(&server, dir.path()).await;

        let job = BatchJobState::new(
            "batch-x".to_string(),
            "file-in".to_string(),
            "/tmp/batch.jsonl".to_string(),
            "qwen-plus".to_string(),
            None,
            vec!["c1".to_string()],
        );
        service.persist_job(&job).unwrap();

        match service.fetch_results("batch-x").await {
            Err(AppError::Conflict(_)) => {}
            other => panic!("expected conflict, got ok={}", other.is_ok()),
        }
    }

    #[test]
    fn test_request_line_contract() {
        let line = build_request_line("conv-42", "[user]: hello", "qwen-plus");
        assert_eq!(line["custom_id"], "conv-42");
        assert_eq!(line["method"], "POST");
        assert_eq!(line["url"], "/v1/chat/completions");
        assert_eq!(line["body"]["model"], "qwen-plus");
        assert_eq!(line["body"]["temperature"], 0.3);
        assert_eq!(line["body"]["response_format"]["type"], "json_object");
        let messages = line["body"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert!(
            messages[1]["content"]
                .as_str()
                .unwrap()
                .contains("<conversation>\n[user]: hello\n</conversation>")
        );
    }

    #[test]
    fn test_conversation_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        let huge = "x".repeat(200_000);
        for _ in 0..4 {
            writeln!(
                f,
                r#"{{"type":"user","message":{{"role":"user","content":"{}"}}}}"#,
                huge
            )
            .unwrap();
        }
        drop(f);

        let text = load_conversation_text(&path).unwrap();
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert!(text.len() <= MAX_CONVERSATION_CHARS + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_parse_result_line_unparseable_content() {
        let line = r#"{"custom_id":"c9","response":{"status_code":200,"body":{"choices":[{"message":{"content":"not json at all"}}]}}}"#;
        let entry = parse_result_line(line).unwrap();
        assert_eq!(entry.conversation_id, "c9");
        assert!(entry.narrative.is_none());
        assert!(entry.error.is_some());
    }
}
