//! DashScope batch API client (OpenAI-compatible files/batches endpoints).
//!
//! Drives the remote half of narrative generation: upload a JSONL request
//! file, create a batch over it, poll its status, and download the output.

use crate::clients::qwen_client::{provider_status_error, provider_transport_error};
use crate::error::{AppError, AppResult};
use crate::utils::http_client::{new_api_client, new_upload_client};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct BatchApiClient {
    http: reqwest::Client,
    upload_http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBatch {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

impl BatchApiClient {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        BatchApiClient {
            http: new_api_client(60),
            upload_http: new_upload_client(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload a prepared JSONL request file; returns the remote file id.
    pub async fn upload_file(&self, path: &Path) -> AppResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch.jsonl".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/jsonl")
            .map_err(|e| AppError::Internal(format!("Invalid multipart payload: {}", e)))?;
        let form = Form::new().part("file", part).text("purpose", "batch");

        let url = format!("{}/files", self.base_url);
        let response = self
            .upload_http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(provider_transport_error)?;

        let uploaded: UploadedFile = self.parse(response).await?;
        Ok(uploaded.id)
    }

    pub async fn create_batch(&self, input_file_id: &str, model: &str) -> AppResult<RemoteBatch> {
        let url = format!("{}/batches", self.base_url);
        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h",
            "metadata": {
                "model": model,
                "created_by": "reflect-server"
            }
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(provider_transport_error)?;
        self.parse(response).await
    }

    pub async fn get_batch(&self, batch_id: &str) -> AppResult<RemoteBatch> {
        let url = format!("{}/batches/{}", self.base_url, batch_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(provider_transport_error)?;
        self.parse(response).await
    }

    pub async fn cancel_batch(&self, batch_id: &str) -> AppResult<RemoteBatch> {
        let url = format!("{}/batches/{}/cancel", self.base_url, batch_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(provider_transport_error)?;
        self.parse(response).await
    }

    /// Download a remote file's content (batch output or error file).
    pub async fn download_file(&self, file_id: &str) -> AppResult<String> {
        let url = format!("{}/files/{}/content", self.base_url, file_id);
        let response = self
            .upload_http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(provider_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(provider_status_error(status, &detail));
        }
        response.text().await.map_err(provider_transport_error)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(provider_status_error(status, &detail));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::ProviderFatal(format!("Invalid batch API response: {}", e)))
    }
}
