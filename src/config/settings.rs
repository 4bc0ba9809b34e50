use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_DASHSCOPE_ENDPOINT: &str = "https://dashscope-intl.aliyuncs.com/compatible-mode/v1";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub qdrant: QdrantConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub import: ImportConfig,
    pub narrative: NarrativeConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Unified ingestion state document (`STATE_FILE`).
    pub state_file: PathBuf,
    /// Root directory holding per-project transcript directories (`LOGS_DIR`).
    pub logs_dir: PathBuf,
    /// One JSON file per remote batch job lives here.
    pub batch_state_dir: PathBuf,
    /// Prepared batch request files (JSONL) live here.
    pub batch_files_dir: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Explicit provider selection (`EMBEDDING_PROVIDER`): "qwen" or "voyage".
    pub provider: Option<String>,
    pub voyage_api_key: Option<String>,
    pub dashscope_api_key: Option<String>,
    pub dashscope_endpoint: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Messages per chunk (`MAX_CHUNK_SIZE`).
    pub max_chunk_size: usize,
    /// Token budget per embedding batch (`MAX_TOKENS_PER_BATCH`).
    pub max_tokens_per_batch: usize,
    /// Chars-per-token divisor for the estimator (`TOKEN_ESTIMATION_RATIO`).
    pub token_estimation_ratio: usize,
    /// Per-scan-cycle cap on files considered (`MAX_FILES_PER_CYCLE`).
    pub max_files_per_cycle: usize,
    /// Seconds between polling scans of the transcript root (`SCAN_INTERVAL`).
    pub scan_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NarrativeConfig {
    pub model: String,
    pub batch_size: usize,
    pub check_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub min_batch: usize,
    pub max_concurrent: usize,
    pub cooldown_secs: u64,
    pub newest_first: bool,
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "reflect-server".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let qdrant_url =
            env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6333".to_string());
        let qdrant_timeout = parse_env("QDRANT_TIMEOUT", 30u64)?;

        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Configuration("Cannot determine home directory".to_string()))?;
        let config_root = home.join(".reflect");

        let state_file = env::var("STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_root.join("config").join("unified-state.json"));

        let logs_dir = env::var("LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".claude").join("projects"));

        let tmp_root = env::var("TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_root.clone());
        let batch_state_dir = tmp_root.join("batch_state");
        let batch_files_dir = tmp_root.join("batch_files");

        let provider = match env::var("EMBEDDING_PROVIDER") {
            Ok(v) => {
                let v = v.trim().to_lowercase();
                match v.as_str() {
                    "qwen" | "voyage" => Some(v),
                    other => {
                        return Err(AppError::Configuration(format!(
                            "EMBEDDING_PROVIDER must be 'qwen' or 'voyage', got '{}'",
                            other
                        )));
                    }
                }
            }
            Err(_) => None,
        };

        let voyage_api_key = env::var("VOYAGE_KEY").ok().filter(|k| !k.is_empty());
        let dashscope_api_key = env::var("DASHSCOPE_API_KEY").ok().filter(|k| !k.is_empty());
        let dashscope_endpoint = env::var("DASHSCOPE_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_DASHSCOPE_ENDPOINT.to_string());

        let import = ImportConfig {
            max_chunk_size: parse_env("MAX_CHUNK_SIZE", 50usize)?,
            max_tokens_per_batch: parse_env("MAX_TOKENS_PER_BATCH", 100_000usize)?,
            token_estimation_ratio: parse_env("TOKEN_ESTIMATION_RATIO", 3usize)?,
            max_files_per_cycle: parse_env("MAX_FILES_PER_CYCLE", 1000usize)?,
            scan_interval_secs: parse_env("SCAN_INTERVAL", 60u64)?,
        };
        if import.max_chunk_size == 0 {
            return Err(AppError::Configuration(
                "MAX_CHUNK_SIZE must be at least 1".to_string(),
            ));
        }
        if import.token_estimation_ratio == 0 {
            return Err(AppError::Configuration(
                "TOKEN_ESTIMATION_RATIO must be at least 1".to_string(),
            ));
        }

        let narrative = NarrativeConfig {
            model: env::var("NARRATIVE_MODEL").unwrap_or_else(|_| "qwen-plus".to_string()),
            batch_size: parse_env("NARRATIVE_BATCH_SIZE", 50usize)?,
            check_interval_secs: parse_env("NARRATIVE_CHECK_INTERVAL", 300u64)?,
            poll_interval_secs: parse_env("NARRATIVE_POLL_INTERVAL", 30u64)?,
            min_batch: parse_env("NARRATIVE_MIN_BATCH", 5usize)?,
            max_concurrent: parse_env("NARRATIVE_MAX_CONCURRENT", 1usize)?,
            cooldown_secs: parse_env("NARRATIVE_COOLDOWN", 60u64)?,
            newest_first: env::var("NARRATIVE_NEWEST_FIRST")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        };

        Ok(AppSettings {
            app: AppConfig {
                name: app_name,
                environment,
            },
            qdrant: QdrantConfig {
                url: qdrant_url,
                timeout_secs: qdrant_timeout,
            },
            storage: StorageConfig {
                state_file,
                logs_dir,
                batch_state_dir,
                batch_files_dir,
            },
            embedding: EmbeddingConfig {
                provider,
                voyage_api_key,
                dashscope_api_key,
                dashscope_endpoint,
            },
            import,
            narrative,
        })
    }
}

fn parse_env<T: FromStr + Copy>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Configuration(format!("{} must be a valid number", name))),
        Err(_) => Ok(default),
    }
}
