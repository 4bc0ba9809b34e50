//! Voyage AI embedding client.

use crate::clients::qwen_client::{provider_status_error, provider_transport_error};
use crate::error::{AppError, AppResult};
use crate::utils::http_client::new_api_client;
use serde::Deserialize;
use serde_json::json;

pub const VOYAGE_DIMENSION: usize = 1024;
pub const VOYAGE_COLLECTION_SUFFIX: &str = "voyage_1024d";

const VOYAGE_EMBEDDING_MODEL: &str = "voyage-3";
const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";
const MAX_BATCH_SIZE: usize = 128;

#[derive(Debug, Clone)]
pub struct VoyageClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
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

impl VoyageClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        VoyageClient {
            http: new_api_client(60),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Embed `texts` in order. `input_type` is `document` for corpus text
    /// and `query` for search queries.
    pub async fn embed_texts(
        &self,
        texts: &[String],
        input_type: &str,
    ) -> AppResult<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for group in texts.chunks(MAX_BATCH_SIZE) {
            all.extend(self.request_embeddings(group, input_type).await?);
        }
        Ok(all)
    }

    async fn request_embeddings(
        &self,
        inputs: &[String],
        input_type: &str,
    ) -> AppResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": VOYAGE_EMBEDDING_MODEL,
            "input": inputs,
            "input_type": input_type,
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_embed_sends_input_type() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/embeddings")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "voyage-3",
                "input_type": "query",
            })))
            .with_body(
                serde_json::json!({
                    "data": [{"index": 0, "embedding": [0.5, 0.5]}],
                    "model": "voyage-3"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = VoyageClient::with_base_url("test-key", &server.url());
        let vectors = client
            .embed_texts(&["what changed last week".to_string()], "query")
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/embeddings")
            .with_status(502)
            .create_async()
            .await;

        let client = VoyageClient::with_base_url("test-key", &server.url());
        let err = client
            .embed_texts(&["text".to_string()], "document")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
