//! Thin typed wrapper over the Qdrant HTTP API.
//!
//! Only the subset the pipelines need is covered: collection management,
//! upsert, filtered search and scroll. Responses arrive wrapped in the
//! standard `{"result": ..., "status": "ok"}` envelope.

use crate::error::{AppError, AppResult};
use crate::utils::http_client::new_api_client;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct QdrantClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointStruct {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Condition {
    Match {
        key: String,
        #[serde(rename = "match")]
        value: MatchValue,
    },
    Range {
        key: String,
        range: RangeSpec,
    },
}

impl Condition {
    pub fn matches(key: &str, value: impl Into<Value>) -> Self {
        Condition::Match {
            key: key.to_string(),
            value: MatchValue {
                value: value.into(),
            },
        }
    }

    /// Datetime range condition over ISO-8601 payload values.
    pub fn datetime_range(key: &str, gte: Option<String>, lt: Option<String>) -> Self {
        Condition::Range {
            key: key.to_string(),
            range: RangeSpec {
                gte,
                lt,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchValue {
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RangeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBy {
    pub key: String,
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    result: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoredPoint {
    pub id: Value,
    pub score: f32,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedPoint {
    pub id: Value,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrollResult {
    #[serde(default)]
    pub points: Vec<RetrievedPoint>,
    #[serde(default)]
    pub next_page_offset: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub points_count: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

impl CollectionInfo {
    /// Vector dimension of the collection's default (unnamed) vector.
    pub fn vector_size(&self) -> Option<usize> {
        self.config
            .as_ref()
            .and_then(|c| c.pointer("/params/vectors/size"))
            .and_then(Value::as_u64)
            .map(|s| s as usize)
    }
}

#[derive(Debug, Deserialize)]
struct CollectionsResult {
    #[serde(default)]
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

impl QdrantClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        QdrantClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: new_api_client(timeout_secs),
        }
    }

    pub async fn list_collections(&self) -> AppResult<Vec<String>> {
        let url = format!("{}/collections", self.base_url);
        let result: CollectionsResult = self.get_json(&url).await?;
        Ok(result.collections.into_iter().map(|c| c.name).collect())
    }

    pub async fn get_collection(&self, name: &str) -> AppResult<CollectionInfo> {
        let url = format!("{}/collections/{}", self.base_url, name);
        self.get_json(&url).await
    }

    pub async fn create_collection(&self, name: &str, dimension: usize) -> AppResult<()> {
        let url = format!("{}/collections/{}", self.base_url, name);
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let _: Value = self.send_json(self.http.put(&url).json(&body)).await?;
        info!("Created collection {} ({}d, cosine)", name, dimension);
        Ok(())
    }

    /// Create the collection if missing; returns the collection's actual
    /// vector dimension so callers can verify it matches their provider.
    pub async fn ensure_collection(&self, name: &str, dimension: usize) -> AppResult<usize> {
        match self.get_collection(name).await {
            Ok(info) => Ok(info.vector_size().unwrap_or(dimension)),
            Err(AppError::NotFound(_)) => {
                self.create_collection(name, dimension).await?;
                Ok(dimension)
            }
            Err(e) => Err(e),
        }
    }

    /// Idempotent keyword/payload index creation. An already-existing index
    /// is not an error.
    pub async fn ensure_payload_index(
        &self,
        collection: &str,
        field: &str,
        schema: &str,
    ) -> AppResult<()> {
        let url = format!("{}/collections/{}/index", self.base_url, collection);
        let body = json!({ "field_name": field, "field_schema": schema });
        match self
            .send_json::<Value>(self.http.put(&url).json(&body))
            .await
        {
            Ok(_) => Ok(()),
            Err(AppError::StoreBadRequest(msg)) => {
                debug!(
                    "Payload index {}.{} already present: {}",
                    collection, field, msg
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn upsert_points(
        &self,
        collection: &str,
        points: Vec<PointStruct>,
        wait: bool,
    ) -> AppResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/collections/{}/points?wait={}",
            self.base_url, collection, wait
        );
        let body = json!({ "points": points });
        let _: Value = self.send_json(self.http.put(&url).json(&body)).await?;
        Ok(())
    }

    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> AppResult<Vec<ScoredPoint>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = serde_json::to_value(f)?;
        }
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        self.send_json(self.http.post(&url).json(&body)).await
    }

    pub async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        order_by: Option<&OrderBy>,
        limit: usize,
        offset: Option<Value>,
    ) -> AppResult<ScrollResult> {
        let url = format!("{}/collections/{}/points/scroll", self.base_url, collection);
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
        });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = serde_json::to_value(f)?;
        }
        if let Some(order) = order_by {
            body["order_by"] = serde_json::to_value(order)?;
        }
        if let Some(cursor) = offset {
            body["offset"] = cursor;
        }
        self.send_json(self.http.post(&url).json(&body)).await
    }

    /// Fetch a single point's payload; `None` when the point is absent.
    pub async fn get_point(&self, collection: &str, id: u64) -> AppResult<Option<Value>> {
        let url = format!("{}/collections/{}/points/{}", self.base_url, collection, id);
        match self.get_json::<RetrievedPoint>(&url).await {
            Ok(point) => Ok(point.payload),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_points(&self, collection: &str, ids: &[u64]) -> AppResult<()> {
        let url = format!("{}/collections/{}/points/delete", self.base_url, collection);
        let body = json!({ "points": ids });
        let _: Value = self.send_json(self.http.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        self.send_json(self.http.get(url)).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> AppResult<T> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            let envelope: ApiEnvelope<T> = response
                .json()
                .await
                .map_err(|e| AppError::Serialization(format!("Invalid store response: {}", e)))?;
            return Ok(envelope.result);
        }

        let detail = response.text().await.unwrap_or_default();
        Err(status_error(status, &detail))
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::StoreTransient(err.to_string())
}

fn status_error(status: reqwest::StatusCode, detail: &str) -> AppError {
    if status.is_server_error() {
        AppError::StoreTransient(format!("{}: {}", status, detail))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        AppError::NotFound(detail.to_string())
    } else {
        AppError::StoreBadRequest(format!("{}: {}", status, detail))
    }
}
