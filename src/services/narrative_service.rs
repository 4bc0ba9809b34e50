//! Narrative storage and retrieval over dedicated `narratives_*`
//! collections.

use crate::clients::qdrant_client::{Condition, Filter, PointStruct, QdrantClient};
use crate::error::{AppError, AppResult};
use crate::models::narrative::Narrative;
use crate::services::embedding::{EmbeddingKind, EmbeddingProvider, validate_embeddings};
use crate::services::state_store::StateStore;
use crate::utils::project_normalizer::{narrative_collection_name, narrative_point_id};
use chrono::Utc;
use futures_util::future::join_all;
use log::{info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

const NARRATIVE_COLLECTION_PREFIX: &str = "narratives_";
const PAYLOAD_INDEX_FIELDS: [&str; 4] = ["conversation_id", "project", "outcome", "complexity"];

/// Embedding inputs are capped; `searchable_text` rarely gets close but a
/// runaway narrative must not blow the provider budget.
const MAX_EMBED_CHARS: usize = 8000;

pub struct NarrativeService {
    qdrant: Arc<QdrantClient>,
    provider: Arc<dyn EmbeddingProvider>,
    state: Arc<StateStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NarrativeHit {
    pub id: String,
    pub score: f32,
    pub collection: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NarrativeStats {
    pub total_narratives: u64,
    pub collections: Vec<CollectionCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionCount {
    pub name: String,
    pub count: u64,
}

impl NarrativeService {
    pub fn new(
        qdrant: Arc<QdrantClient>,
        provider: Arc<dyn EmbeddingProvider>,
        state: Arc<StateStore>,
    ) -> Self {
        NarrativeService {
            qdrant,
            provider,
            state,
        }
    }

    /// Ensure the project's narrative collection exists with payload indexes
    /// for the filterable fields.
    pub async fn ensure_collection(&self, project: &str) -> AppResult<String> {
        let collection = narrative_collection_name(project);
        self.qdrant
            .ensure_collection(&collection, self.provider.dimension())
            .await?;
        for field in PAYLOAD_INDEX_FIELDS {
            self.qdrant
                .ensure_payload_index(&collection, field, "keyword")
                .await?;
        }
        Ok(collection)
    }

    /// Embed and upsert one narrative; flips `has_narrative` in the state
    /// store. Storing the same conversation twice overwrites one point.
    pub async fn store_narrative(
        &self,
        conversation_id: &str,
        project: &str,
        narrative: &Narrative,
        tokens_used: Option<Value>,
    ) -> AppResult<u64> {
        let collection = self.ensure_collection(project).await?;

        let mut searchable_text = narrative.searchable_text();
        if searchable_text.is_empty() {
            return Err(AppError::Validation(format!(
                "Narrative for {} has no content to index",
                conversation_id
            )));
        }
        if searchable_text.len() > MAX_EMBED_CHARS {
            let mut cut = MAX_EMBED_CHARS;
            while cut > 0 && !searchable_text.is_char_boundary(cut) {
                cut -= 1;
            }
            searchable_text.truncate(cut);
        }

        let vectors = self
            .provider
            .embed(EmbeddingKind::Document, &[searchable_text.clone()])
            .await?;
        validate_embeddings(&vectors, 1, self.provider.dimension())?;
        let vector = vectors.into_iter().next().unwrap_or_default();

        let point_id = narrative_point_id(conversation_id);
        let mut payload = serde_json::to_value(narrative)?;
        payload["conversation_id"] = json!(conversation_id);
        payload["project"] = json!(project);
        payload["created_at"] = json!(Utc::now().to_rfc3339());
        payload["searchable_text"] = json!(searchable_text);
        payload["tokens_used"] = tokens_used.unwrap_or_else(|| json!({}));

        self.qdrant
            .upsert_points(
                &collection,
                vec![PointStruct {
                    id: point_id,
                    vector,
                    payload,
                }],
                false,
            )
            .await?;

        self.state
            .mark_narratives(&[conversation_id.to_string()])
            .await?;

        info!(
            "Stored narrative for conversation {} in {}",
            conversation_id, collection
        );
        Ok(point_id)
    }

    /// Semantic search over narratives. With a project, one collection is
    /// searched; without, every `narratives_*` collection is merged by
    /// score.
    pub async fn search_narratives(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
        min_score: f32,
        filters: &[(String, String)],
    ) -> AppResult<Vec<NarrativeHit>> {
        let vectors = self
            .provider
            .embed(EmbeddingKind::Query, &[query.to_string()])
            .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ProviderFatal("Empty query embedding".to_string()))?;

        let collections = match project {
            Some(p) if p != "all" => vec![narrative_collection_name(p)],
            _ => self.list_narrative_collections().await?,
        };

        let mut filter = Filter::default();
        for (key, value) in filters {
            filter.must.push(Condition::matches(key, value.clone()));
        }
        let filter = (!filter.is_empty()).then_some(filter);

        let searches = collections.iter().map(|collection| {
            let vector = vector.clone();
            let filter = filter.clone();
            async move {
                let hits = self
                    .qdrant
                    .search(collection, &vector, limit, filter.as_ref(), Some(min_score))
                    .await;
                (collection.clone(), hits)
            }
        });

        let mut results = Vec::new();
        for (collection, outcome) in join_all(searches).await {
            match outcome {
                Ok(hits) => {
                    results.extend(hits.into_iter().map(|hit| NarrativeHit {
                        id: hit.id.to_string(),
                        score: hit.score,
                        collection: collection.clone(),
                        payload: hit.payload.unwrap_or(Value::Null),
                    }));
                }
                Err(e) => warn!("Error searching {}: {}", collection, e),
            }
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    /// Fetch one conversation's stored narrative payload, if present.
    pub async fn get_narrative(
        &self,
        conversation_id: &str,
        project: &str,
    ) -> AppResult<Option<Value>> {
        let collection = narrative_collection_name(project);
        self.qdrant
            .get_point(&collection, narrative_point_id(conversation_id))
            .await
    }

    pub async fn delete_narrative(&self, conversation_id: &str, project: &str) -> AppResult<()> {
        let collection = narrative_collection_name(project);
        self.qdrant
            .delete_points(&collection, &[narrative_point_id(conversation_id)])
            .await
    }

    pub async fn stats(&self, project: Option<&str>) -> AppResult<NarrativeStats> {
        let collections = match project {
            Some(p) if p != "all" => vec![narrative_collection_name(p)],
            _ => self.list_narrative_collections().await?,
        };

        let mut stats = NarrativeStats::default();
        for collection in collections {
            match self.qdrant.get_collection(&collection).await {
                Ok(info) => {
                    let count = info.points_count.unwrap_or(0);
                    stats.total_narratives += count;
                    stats.collections.push(CollectionCount {
                        name: collection,
                        count,
                    });
                }
                Err(e) => warn!("Error getting stats for {}: {}", collection, e),
            }
        }
        Ok(stats)
    }

    async fn list_narrative_collections(&self) -> AppResult<Vec<String>> {
        Ok(self
            .qdrant
            .list_collections()
            .await?
            .into_iter()
            .filter(|name| name.starts_with(NARRATIVE_COLLECTION_PREFIX))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::narrative::{Complexity, Outcome};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    struct StubProvider;

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(
            &self,
            _kind: EmbeddingKind,
            texts: &[String],
        ) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|_| (0..4).map(|d| (d as f32 + 1.0) * 0.25).collect())
                .collect())
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

    async fn service_with(
        server: &mockito::ServerGuard,
        dir: &Path,
    ) -> (NarrativeService, Arc<StateStore>) {
        let state = Arc::new(StateStore::open(dir.join("state.json")).unwrap());
        let service = NarrativeService::new(
            Arc::new(QdrantClient::new(&server.url(), 5)),
            Arc::new(StubProvider),
            state.clone(),
        );
        (service, state)
    }

    fn sample_narrative() -> Narrative {
        Narrative {
            summary: "Diagnosed and fixed the flaky importer".to_string(),
            problem: "Imports intermittently dropped chunks".to_string(),
            solution: "Serialized state writes".to_string(),
            decisions: vec!["single-writer state store".to_string()],
            files_modified: vec!["src/services/import_service.rs".to_string()],
            key_insights: vec!["atomic rename prevents torn state".to_string()],
            tags: vec!["importer".to_string(), "concurrency".to_string()],
            complexity: Complexity::Medium,
            outcome: Outcome::Success,
        }
    }

    #[tokio::test]
    async fn test_store_narrative_upserts_and_flags_state() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, state) = service_with(&server, dir.path()).await;

        let collection = narrative_collection_name("my-app");
        let point_id = narrative_point_id("conv-1");

        // State record whose stem matches the conversation id.
        let transcript = dir.path().join("conv-1.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();
        state
            .update_file(
                &transcript.to_string_lossy(),
                crate::models::state::FileRecord {
                    imported_at: "2025-01-01T00:00:00Z".to_string(),
                    last_modified: 1.0,
                    chunks: 2,
                    status: crate::models::state::FileStatus::Completed,
                    collection: "conv_x_qwen_2048d".to_string(),
                    has_narrative: None,
                    narrative_generated_at: None,
                },
            )
            .await
            .unwrap();

        server
            .mock("GET", format!("/collections/{}", collection).as_str())
            .with_body(r#"{"result":{"config":{"params":{"vectors":{"size":4}}}},"status":"ok"}"#)
            .create_async()
            .await;
        server
            .mock("PUT", format!("/collections/{}/index", collection).as_str())
            .with_body(r#"{"result":true,"status":"ok"}"#)
            .expect(4)
            .create_async()
            .await;
        let upsert = server
            .mock(
                "PUT",
                format!("/collections/{}/points?wait=false", collection).as_str(),
            )
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "points": [{"id": point_id}]
            })))
            .with_body(r#"{"result":{"status":"acknowledged"},"status":"ok"}"#)
            .create_async()
            .await;

        let stored_id = service
            .store_narrative("conv-1", "my-app", &sample_narrative(), None)
            .await
            .unwrap();
        assert_eq!(stored_id, point_id);
        upsert.assert_async().await;

        let record = state.get(&transcript.to_string_lossy()).await.unwrap();
        assert_eq!(record.has_narrative, Some(true));
        assert!(record.narrative_generated_at.is_some());
    }

    #[tokio::test]
    async fn test_search_merges_collections_by_score() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, _state) = service_with(&server, dir.path()).await;

        server
            .mock("GET", "/collections")
            .with_body(
                r#"{"result":{"collections":[{"name":"narratives_aaa"},{"name":"narratives_bbb"},{"name":"conv_x_qwen_2048d"}]},"status":"ok"}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/collections/narratives_aaa/points/search")
            .with_body(
                r#"{"result":[{"id":1,"score":0.62,"payload":{"summary":"low"}}],"status":"ok"}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/collections/narratives_bbb/points/search")
            .with_body(
                r#"{"result":[{"id":2,"score":0.94,"payload":{"summary":"high"}}],"status":"ok"}"#,
            )
            .create_async()
            .await;

        let hits = service
            .search_narratives("importer race", None, 5, 0.3, &[])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload["summary"], "high");
        assert_eq!(hits[1].payload["summary"], "low");
    }

    #[tokio::test]
    async fn test_store_rejects_empty_narrative() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (service, _state) = service_with(&server, dir.path()).await;

        let empty = Narrative::default();
        match service.store_narrative("c", "p", &empty, None).await {
            Err(AppError::Validation(_)) => {}
            other => panic!("expected validation error, got ok={}", other.is_ok()),
        }
    }
}
