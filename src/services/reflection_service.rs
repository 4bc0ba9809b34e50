//! Project-scoped semantic retrieval over conversation collections.

use crate::clients::qdrant_client::{
    Condition, Filter, OrderBy, OrderDirection, QdrantClient, RetrievedPoint,
};
use crate::error::{AppError, AppResult};
use crate::services::embedding::{EmbeddingKind, EmbeddingProvider};
use crate::services::project_resolver::{project_matches, resolve_collections};
use crate::utils::temporal::TimeRange;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 5;
const DEFAULT_MIN_SCORE: f32 = 0.7;
const DEFAULT_DECAY_ALPHA: f32 = 0.5;
const DEFAULT_DECAY_HALF_LIFE_DAYS: f64 = 90.0;

const SCROLL_PAGE_SIZE: usize = 128;
const SCROLL_MAX_PAGES: usize = 8;

#[derive(Debug, Clone)]
pub struct ReflectOptions {
    pub project: Option<String>,
    pub limit: usize,
    pub min_score: f32,
    pub time_range: Option<TimeRange>,
    pub use_decay: bool,
    pub decay_alpha: f32,
    pub decay_half_life_days: f64,
}

impl Default for ReflectOptions {
    fn default() -> Self {
        ReflectOptions {
            project: None,
            limit: DEFAULT_LIMIT,
            min_score: DEFAULT_MIN_SCORE,
            time_range: None,
            use_decay: false,
            decay_alpha: DEFAULT_DECAY_ALPHA,
            decay_half_life_days: DEFAULT_DECAY_HALF_LIFE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub collection: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimelineBucket {
    pub bucket: String,
    pub count: usize,
}

pub struct ReflectionService {
    qdrant: Arc<QdrantClient>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl ReflectionService {
    pub fn new(qdrant: Arc<QdrantClient>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        ReflectionService { qdrant, provider }
    }

    /// Semantic search over the resolved collections, optionally
    /// time-filtered and time-decay rescored.
    pub async fn reflect(&self, query: &str, options: &ReflectOptions) -> AppResult<Vec<SearchHit>> {
        let collections = self.resolved_collections(options.project.as_deref()).await?;
        if collections.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self
            .provider
            .embed(EmbeddingKind::Query, &[query.to_string()])
            .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ProviderFatal("Empty query embedding".to_string()))?;

        let filter = options.time_range.map(time_range_filter);

        let searches = collections.iter().map(|collection| {
            let vector = vector.clone();
            let filter = filter.clone();
            async move {
                let hits = self
                    .qdrant
                    .search(
                        collection,
                        &vector,
                        options.limit,
                        filter.as_ref(),
                        Some(options.min_score),
                    )
                    .await;
                (collection.clone(), hits)
            }
        });

        let mut results = Vec::new();
        for (collection, outcome) in join_all(searches).await {
            match outcome {
                Ok(hits) => {
                    for hit in hits {
                        let payload = hit.payload.unwrap_or(Value::Null);
                        if !payload_matches_project(&payload, options.project.as_deref()) {
                            continue;
                        }
                        results.push(SearchHit {
                            score: hit.score,
                            collection: collection.clone(),
                            payload,
                        });
                    }
                }
                Err(e) => warn!("Error searching {}: {}", collection, e),
            }
        }

        if options.use_decay {
            let now = Utc::now();
            for hit in &mut results {
                hit.score = apply_decay(
                    hit.score,
                    payload_timestamp(&hit.payload),
                    now,
                    options.decay_alpha,
                    options.decay_half_life_days,
                );
            }
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(options.limit);
        Ok(results)
    }

    /// Most recent chunks across the resolved collections, newest first.
    pub async fn recent_work(
        &self,
        project: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<SearchHit>> {
        let collections = self.resolved_collections(project).await?;
        let order = OrderBy {
            key: "timestamp".to_string(),
            direction: OrderDirection::Desc,
        };

        let mut results = Vec::new();
        for collection in &collections {
            match self
                .qdrant
                .scroll(collection, None, Some(&order), limit, None)
                .await
            {
                Ok(page) => {
                    for point in page.points {
                        let payload = point.payload.unwrap_or(Value::Null);
                        if !payload_matches_project(&payload, project) {
                            continue;
                        }
                        results.push(SearchHit {
                            score: 0.0,
                            collection: collection.clone(),
                            payload,
                        });
                    }
                }
                Err(e) => warn!("Error scrolling {}: {}", collection, e),
            }
        }

        results.sort_by(|a, b| {
            payload_timestamp_str(&b.payload).cmp(&payload_timestamp_str(&a.payload))
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Bucket conversation activity inside a time range.
    pub async fn timeline(
        &self,
        range: TimeRange,
        granularity: Granularity,
        project: Option<&str>,
    ) -> AppResult<Vec<TimelineBucket>> {
        let filter = time_range_filter(range);
        let points = self
            .scroll_filtered(project, Some(&filter), usize::MAX)
            .await?;

        let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
        for point in points {
            let payload = point.payload.unwrap_or(Value::Null);
            if !payload_matches_project(&payload, project) {
                continue;
            }
            let Some(ts) = payload_timestamp(&payload) else {
                continue;
            };
            *buckets.entry(bucket_key(ts, granularity)).or_insert(0) += 1;
        }

        Ok(buckets
            .into_iter()
            .map(|(bucket, count)| TimelineBucket { bucket, count })
            .collect())
    }

    /// Conversations touching a file path (analyzed or edited). Substring
    /// match is applied client-side over the payload file lists.
    pub async fn search_by_file(
        &self,
        file_substr: &str,
        project: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<SearchHit>> {
        let collections = self.resolved_collections(project).await?;
        let mut results = Vec::new();

        'outer: for collection in &collections {
            let mut cursor: Option<Value> = None;
            for _ in 0..SCROLL_MAX_PAGES {
                let page = match self
                    .qdrant
                    .scroll(collection, None, None, SCROLL_PAGE_SIZE, cursor.clone())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Error scrolling {}: {}", collection, e);
                        break;
                    }
                };
                let empty = page.points.is_empty();
                for point in page.points {
                    let payload = point.payload.unwrap_or(Value::Null);
                    if !payload_matches_project(&payload, project) {
                        continue;
                    }
                    if file_list_contains(&payload, "files_analyzed", file_substr)
                        || file_list_contains(&payload, "files_edited", file_substr)
                    {
                        results.push(SearchHit {
                            score: 0.0,
                            collection: collection.clone(),
                            payload,
                        });
                        if results.len() >= limit {
                            break 'outer;
                        }
                    }
                }
                match page.next_page_offset {
                    Some(next) if !empty => cursor = Some(next),
                    _ => break,
                }
            }
        }
        Ok(results)
    }

    /// Conversations tagged with an exact concept (server-side filter).
    pub async fn search_by_concept(
        &self,
        concept: &str,
        project: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<SearchHit>> {
        let filter = Filter {
            must: vec![Condition::matches("concepts", concept)],
            ..Default::default()
        };

        let collections = self.resolved_collections(project).await?;
        let mut results = Vec::new();
        for collection in &collections {
            match self
                .qdrant
                .scroll(collection, Some(&filter), None, limit, None)
                .await
            {
                Ok(page) => {
                    for point in page.points {
                        let payload = point.payload.unwrap_or(Value::Null);
                        if !payload_matches_project(&payload, project) {
                            continue;
                        }
                        results.push(SearchHit {
                            score: 0.0,
                            collection: collection.clone(),
                            payload,
                        });
                    }
                }
                Err(e) => warn!("Error scrolling {}: {}", collection, e),
            }
            if results.len() >= limit {
                break;
            }
        }
        results.truncate(limit);
        Ok(results)
    }

    async fn resolved_collections(&self, project: Option<&str>) -> AppResult<Vec<String>> {
        let all = self.qdrant.list_collections().await?;
        Ok(resolve_collections(project.unwrap_or("all"), &all))
    }

    /// Paged scroll over every resolved collection, bounded by
    /// `SCROLL_MAX_PAGES` per collection.
    async fn scroll_filtered(
        &self,
        project: Option<&str>,
        filter: Option<&Filter>,
        max_points: usize,
    ) -> AppResult<Vec<RetrievedPoint>> {
        let collections = self.resolved_collections(project).await?;
        let mut points = Vec::new();

        'outer: for collection in &collections {
            let mut cursor: Option<Value> = None;
            for _ in 0..SCROLL_MAX_PAGES {
                let page = match self
                    .qdrant
                    .scroll(collection, filter, None, SCROLL_PAGE_SIZE, cursor.clone())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Error scrolling {}: {}", collection, e);
                        break;
                    }
                };
                let empty = page.points.is_empty();
                points.extend(page.points);
                if points.len() >= max_points {
                    break 'outer;
                }
                match page.next_page_offset {
                    Some(next) if !empty => cursor = Some(next),
                    _ => break,
                }
            }
        }
        Ok(points)
    }
}

fn time_range_filter(range: TimeRange) -> Filter {
    Filter {
        must: vec![Condition::datetime_range(
            "timestamp",
            Some(range.start.to_rfc3339()),
            Some(range.end.to_rfc3339()),
        )],
        ..Default::default()
    }
}

/// `final = score * (alpha + (1 - alpha) * exp(-age_days / half_life))`.
/// Scores decay toward `alpha * score` as content ages.
fn apply_decay(
    score: f32,
    timestamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    alpha: f32,
    half_life_days: f64,
) -> f32 {
    let Some(ts) = timestamp else {
        return score;
    };
    let age_days = (now - ts).num_seconds().max(0) as f64 / 86_400.0;
    let multiplier = f64::from(alpha) + (1.0 - f64::from(alpha)) * (-age_days / half_life_days).exp();
    score * multiplier as f32
}

fn payload_timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn payload_timestamp_str(payload: &Value) -> String {
    payload
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn payload_matches_project(payload: &Value, project: Option<&str>) -> bool {
    let Some(target) = project else {
        return true;
    };
    if target == "all" {
        return true;
    }
    match payload.get("project").and_then(Value::as_str) {
        Some(stored) => project_matches(stored, target),
        // Payloads without a project field stay visible; the collection
        // scoping already narrowed them.
        None => true,
    }
}

fn file_list_contains(payload: &Value, key: &str, needle: &str) -> bool {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .any(|f| f.contains(needle))
        })
        .unwrap_or(false)
}

fn bucket_key(ts: DateTime<Utc>, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour => ts.format("%Y-%m-%dT%H:00").to_string(),
        Granularity::Day => ts.format("%Y-%m-%d").to_string(),
        Granularity::Week => ts.format("%G-W%V").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decay_prefers_recent_content() {
        let now = Utc.with_ymd_and_hms(2025, 6, 18, 0, 0, 0).unwrap();
        let fresh = now - chrono::Duration::days(1);
        let stale = now - chrono::Duration::days(365);

        let fresh_score = apply_decay(0.8, Some(fresh), now, 0.5, 90.0);
        let stale_score = apply_decay(0.8, Some(stale), now, 0.5, 90.0);

        assert!(fresh_score > stale_score);
        // Decay never drops below alpha * score.
        assert!(stale_score >= 0.8 * 0.5);
        // Fresh content keeps nearly its raw score.
        assert!((fresh_score - 0.8).abs() < 0.01);
    }

    #[test]
    fn test_decay_without_timestamp_is_identity() {
        let now = Utc::now();
        assert_eq!(apply_decay(0.9, None, now, 0.5, 90.0), 0.9);
    }

    #[test]
    fn test_bucket_keys() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 18, 14, 42, 0).unwrap();
        assert_eq!(bucket_key(ts, Granularity::Hour), "2025-06-18T14:00");
        assert_eq!(bucket_key(ts, Granularity::Day), "2025-06-18");
        assert_eq!(bucket_key(ts, Granularity::Week), "2025-W25");
    }

    #[test]
    fn test_payload_project_matching_accepts_both_variants() {
        let raw = json!({"project": "-Users-x-projects-foo"});
        let normalized = json!({"project": "foo"});
        assert!(payload_matches_project(&raw, Some("foo")));
        assert!(payload_matches_project(&normalized, Some("foo")));
        assert!(!payload_matches_project(&json!({"project": "bar"}), Some("foo")));
        assert!(payload_matches_project(&json!({}), Some("foo")));
    }

    #[test]
    fn test_file_list_contains_substring() {
        let payload = json!({
            "files_analyzed": ["/app/src/main.rs", "/app/Cargo.toml"],
            "files_edited": []
        });
        assert!(file_list_contains(&payload, "files_analyzed", "main.rs"));
        assert!(!file_list_contains(&payload, "files_edited", "main.rs"));
        assert!(!file_list_contains(&payload, "files_analyzed", "lib.rs"));
    }

    struct StubProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(
            &self,
            _kind: EmbeddingKind,
            texts: &[String],
        ) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.2, 0.4, 0.6, 0.8]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn collection_suffix(&self) -> &'static str {
            "qwen_2048d"
        }

        fn provider_name(&self) -> &'static str {
            "stub"
        }
    }

    fn service_for(server: &mockito::ServerGuard) -> ReflectionService {
        ReflectionService::new(
            Arc::new(QdrantClient::new(&server.url(), 5)),
            Arc::new(StubProvider),
        )
    }

    #[tokio::test]
    async fn test_reflect_merges_and_ranks_across_collections() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections")
            .with_body(
                r#"{"result":{"collections":[{"name":"conv_7f6df0fc_qwen_2048d"},{"name":"conv_9f2f312b_qwen_2048d"}]},"status":"ok"}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/collections/conv_7f6df0fc_qwen_2048d/points/search")
            .with_body(
                r#"{"result":[{"id":1,"score":0.72,"payload":{"conversation_id":"a","timestamp":"2025-06-01T00:00:00Z"}}],"status":"ok"}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/collections/conv_9f2f312b_qwen_2048d/points/search")
            .with_body(
                r#"{"result":[{"id":2,"score":0.91,"payload":{"conversation_id":"b","timestamp":"2025-06-02T00:00:00Z"}}],"status":"ok"}"#,
            )
            .create_async()
            .await;

        let service = service_for(&server);
        let hits = service
            .reflect("importer race", &ReflectOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload["conversation_id"], "b");
        assert_eq!(hits[1].payload["conversation_id"], "a");
    }

    #[tokio::test]
    async fn test_reflect_scopes_to_project_collections() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections")
            .with_body(
                r#"{"result":{"collections":[{"name":"conv_7f6df0fc_qwen_2048d"},{"name":"conv_9f2f312b_qwen_2048d"}]},"status":"ok"}"#,
            )
            .create_async()
            .await;
        // Only the claude-self-reflect collection may be searched.
        let scoped = server
            .mock("POST", "/collections/conv_7f6df0fc_qwen_2048d/points/search")
            .with_body(r#"{"result":[],"status":"ok"}"#)
            .expect(1)
            .create_async()
            .await;
        let other = server
            .mock("POST", "/collections/conv_9f2f312b_qwen_2048d/points/search")
            .expect(0)
            .create_async()
            .await;

        let service = service_for(&server);
        let options = ReflectOptions {
            project: Some("claude-self-reflect".to_string()),
            ..Default::default()
        };
        let hits = service.reflect("anything", &options).await.unwrap();
        assert!(hits.is_empty());
        scoped.assert_async().await;
        other.assert_async().await;
    }

    #[tokio::test]
    async fn test_timeline_buckets_by_day() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/collections")
            .with_body(
                r#"{"result":{"collections":[{"name":"conv_7f6df0fc_qwen_2048d"}]},"status":"ok"}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/collections/conv_7f6df0fc_qwen_2048d/points/scroll")
            .with_body(
                r#"{"result":{"points":[
                    {"id":1,"payload":{"timestamp":"2025-06-16T09:00:00Z"}},
                    {"id":2,"payload":{"timestamp":"2025-06-16T17:30:00Z"}},
                    {"id":3,"payload":{"timestamp":"2025-06-17T08:00:00Z"}}
                ],"next_page_offset":null},"status":"ok"}"#,
            )
            .create_async()
            .await;

        let service = service_for(&server);
        let range = TimeRange {
            start: Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 18, 0, 0, 0).unwrap(),
        };
        let buckets = service
            .timeline(range, Granularity::Day, None)
            .await
            .unwrap();
        assert_eq!(
            buckets,
            vec![
                TimelineBucket {
                    bucket: "2025-06-16".to_string(),
                    count: 2
                },
                TimelineBucket {
                    bucket: "2025-06-17".to_string(),
                    count: 1
                },
            ]
        );
    }
}
