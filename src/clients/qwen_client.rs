//! Qwen (DashScope) embedding client, speaking the OpenAI-compatible
//! `/embeddings` endpoint.
//!
//! The API accepts at most 10 inputs per request and roughly 2 000 tokens
//! per input. Texts above the character budget are split on sentence
//! boundaries, each piece embedded separately, and the piece vectors
//! averaged element-wise into one vector for the original text.

use crate::error::{AppError, AppResult};
use crate::utils::http_client::new_api_client;
use log::debug;
use serde::Deserialize;
use serde_json::json;

pub const QWEN_DIMENSION: usize = 2048;
pub const QWEN_COLLECTION_SUFFIX: &str = "qwen_2048d";

const QWEN_EMBEDDING_MODEL: &str = "text-embedding-v4";
const MAX_BATCH_SIZE: usize = 10;
const MAX_CHARS: usize = 6000;

#[derive(Debug, Clone)]
pub struct QwenClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl QwenClient {
    pub fn new(api_key: &str, endpoint: &str) -> Self {
        QwenClient {
            http: new_api_client(60),
            api_key: api_key.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Embed `texts` in order. Handles per-request batch limits and the
    /// split-and-average path for oversized inputs.
    pub async fn embed_texts(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let mut short_indices = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if text.len() <= MAX_CHARS {
                short_indices.push(i);
            } else {
                let pieces = split_on_sentences(text, MAX_CHARS);
                debug!(
                    "Text of {} chars split into {} pieces for embedding",
                    text.len(),
                    pieces.len()
                );
                let mut piece_vectors = Vec::with_capacity(pieces.len());
                for group in pieces.chunks(MAX_BATCH_SIZE) {
                    let refs: Vec<&str> = group.iter().map(String::as_str).collect();
                    piece_vectors.extend(self.request_embeddings(&refs).await?);
                }
                results[i] = Some(average_vectors(&piece_vectors)?);
            }
        }

        for group in short_indices.chunks(MAX_BATCH_SIZE) {
            let refs: Vec<&str> = group.iter().map(|&i| texts[i].as_str()).collect();
            let vectors = self.request_embeddings(&refs).await?;
            for (&slot, vector) in group.iter().zip(vectors) {
                results[slot] = Some(vector);
            }
        }

        results
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| AppError::Internal("Missing embedding slot".to_string()))
            })
            .collect()
    }

    async fn request_embeddings(&self, inputs: &[&str]) -> AppResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.endpoint);
        let body = json!({
            "model": QWEN_EMBEDDING_MODEL,
            "input": inputs,
            "dimensions": QWEN_DIMENSION,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(provider_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(provider_status_error(status, &detail));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderFatal(format!("Invalid embedding response: {}", e)))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        if data.len() != inputs.len() {
            return Err(AppError::ProviderFatal(format!(
                "Provider returned {} vectors for {} inputs",
                data.len(),
                inputs.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

pub(crate) fn provider_transport_error(err: reqwest::Error) -> AppError {
    AppError::ProviderTransient(err.to_string())
}

pub(crate) fn provider_status_error(status: reqwest::StatusCode, detail: &str) -> AppError {
    if status.is_server_error() {
        AppError::ProviderTransient(format!("{}: {}", status, detail))
    } else {
        // Auth, quota and malformed-request errors will not heal on retry.
        AppError::ProviderFatal(format!("{}: {}", status, detail))
    }
}

/// Split `text` into pieces of at most `max_chars`, preferring sentence
/// boundaries. Falls back to a hard prefix cut for unbroken text.
fn split_on_sentences(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let normalized = text.replace(['!', '?'], ".");
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in normalized.split('.') {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if current.len() + sentence.len() + 2 > max_chars {
            if !current.is_empty() {
                pieces.push(current.trim().to_string());
            }
            if sentence.len() + 1 > max_chars {
                // A single run-on sentence beyond the budget gets hard-cut.
                pieces.push(truncate_at_char_boundary(sentence, max_chars).to_string());
                current = String::new();
                continue;
            }
            current = format!("{}.", sentence);
        } else {
            current.push_str(sentence);
            current.push('.');
        }
    }

    if !current.is_empty() {
        pieces.push(current.trim().to_string());
    }

    if pieces.is_empty() {
        pieces.push(truncate_at_char_boundary(text, max_chars).to_string());
    }

    pieces
}

fn truncate_at_char_boundary(text: &str, mut max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    while max > 0 && !text.is_char_boundary(max) {
        max -= 1;
    }
    &text[..max]
}

fn average_vectors(vectors: &[Vec<f32>]) -> AppResult<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| AppError::ProviderFatal("No vectors to average".to_string()))?;
    let dim = first.len();
    let mut sum = vec![0.0f64; dim];
    for vector in vectors {
        if vector.len() != dim {
            return Err(AppError::ProviderFatal(format!(
                "Cannot average vectors of dimension {} and {}",
                dim,
                vector.len()
            )));
        }
        for (acc, v) in sum.iter_mut().zip(vector) {
            *acc += f64::from(*v);
        }
    }
    let count = vectors.len() as f64;
    Ok(sum.into_iter().map(|v| (v / count) as f32).collect())
}
