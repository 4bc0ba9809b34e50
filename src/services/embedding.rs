//! Embedding provider abstraction and factory.
//!
//! Two cloud providers are supported. The factory honours an explicit
//! `EMBEDDING_PROVIDER` selection first, then falls back to whichever
//! provider has a configured API key (qwen preferred for new installs —
//! higher dimension at lower cost).

use crate::clients::qwen_client::{QWEN_COLLECTION_SUFFIX, QWEN_DIMENSION, QwenClient};
use crate::clients::voyage_client::{VOYAGE_COLLECTION_SUFFIX, VOYAGE_DIMENSION, VoyageClient};
use crate::config::settings::EmbeddingConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Document,
    Query,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` in order; one vector per input.
    async fn embed(&self, kind: EmbeddingKind, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;

    /// Collection-name suffix encoding provider and dimension.
    fn collection_suffix(&self) -> &'static str;

    fn provider_name(&self) -> &'static str;
}

#[async_trait]
impl EmbeddingProvider for QwenClient {
    async fn embed(&self, _kind: EmbeddingKind, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        // The DashScope embeddings endpoint has no document/query asymmetry.
        self.embed_texts(texts).await
    }

    fn dimension(&self) -> usize {
        QWEN_DIMENSION
    }

    fn collection_suffix(&self) -> &'static str {
        QWEN_COLLECTION_SUFFIX
    }

    fn provider_name(&self) -> &'static str {
        "qwen"
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageClient {
    async fn embed(&self, kind: EmbeddingKind, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let input_type = match kind {
            EmbeddingKind::Document => "document",
            EmbeddingKind::Query => "query",
        };
        self.embed_texts(texts, input_type).await
    }

    fn dimension(&self) -> usize {
        VOYAGE_DIMENSION
    }

    fn collection_suffix(&self) -> &'static str {
        VOYAGE_COLLECTION_SUFFIX
    }

    fn provider_name(&self) -> &'static str {
        "voyage"
    }
}

pub fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_deref() {
        Some("qwen") => {
            let key = config.dashscope_api_key.as_deref().ok_or_else(|| {
                AppError::Configuration(
                    "EMBEDDING_PROVIDER=qwen requires DASHSCOPE_API_KEY".to_string(),
                )
            })?;
            info!("Using qwen embeddings (text-embedding-v4, 2048d)");
            Ok(Arc::new(QwenClient::new(key, &config.dashscope_endpoint)))
        }
        Some("voyage") => {
            let key = config.voyage_api_key.as_deref().ok_or_else(|| {
                AppError::Configuration("EMBEDDING_PROVIDER=voyage requires VOYAGE_KEY".to_string())
            })?;
            info!("Using voyage embeddings (voyage-3, 1024d)");
            Ok(Arc::new(VoyageClient::new(key)))
        }
        Some(other) => Err(AppError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
        None => {
            if let Some(key) = config.dashscope_api_key.as_deref() {
                info!("Auto-selected qwen embeddings (text-embedding-v4, 2048d)");
                Ok(Arc::new(QwenClient::new(key, &config.dashscope_endpoint)))
            } else if let Some(key) = config.voyage_api_key.as_deref() {
                info!("Auto-selected voyage embeddings (voyage-3, 1024d)");
                Ok(Arc::new(VoyageClient::new(key)))
            } else {
                Err(AppError::Configuration(
                    "No embedding provider configured; set DASHSCOPE_API_KEY or VOYAGE_KEY"
                        .to_string(),
                ))
            }
        }
    }
}

/// Reject malformed provider output before anything reaches the vector
/// store: wrong count, wrong dimension, or degenerate (near-constant)
/// vectors.
pub fn validate_embeddings(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> AppResult<()> {
    if vectors.len() != expected_count {
        return Err(AppError::ProviderFatal(format!(
            "Expected {} vectors, got {}",
            expected_count,
            vectors.len()
        )));
    }
    for (i, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(AppError::ProviderFatal(format!(
                "Vector {} has dimension {}, expected {}",
                i,
                vector.len(),
                dimension
            )));
        }
        if variance(vector) < 1e-6 {
            return Err(AppError::ProviderFatal(format!(
                "Degenerate embedding at index {} (variance below threshold)",
                i
            )));
        }
    }
    Ok(())
}

fn variance(vector: &[f32]) -> f64 {
    if vector.is_empty() {
        return 0.0;
    }
    let n = vector.len() as f64;
    let mean = vector.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
    vector
        .iter()
        .map(|v| {
            let d = f64::from(*v) - mean;
            d * d
        })
        .sum::<f64>()
        / n
}
