use std::error::Error as StdError;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    Configuration(String),
    Validation(String),
    Parse(String),
    FileFailed(String),
    ProviderTransient(String),
    ProviderFatal(String),
    StoreTransient(String),
    StoreBadRequest(String),
    NotFound(String),
    Conflict(String),
    Serialization(String),
    Io(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Validation(e) => write!(f, "Validation error: {}", e),
            AppError::Parse(e) => write!(f, "Parse error: {}", e),
            AppError::FileFailed(e) => write!(f, "File ingestion failed: {}", e),
            AppError::ProviderTransient(e) => write!(f, "Embedding provider unavailable: {}", e),
            AppError::ProviderFatal(e) => write!(f, "Embedding provider error: {}", e),
            AppError::StoreTransient(e) => write!(f, "Vector store unavailable: {}", e),
            AppError::StoreBadRequest(e) => write!(f, "Vector store rejected request: {}", e),
            AppError::NotFound(e) => write!(f, "Not found: {}", e),
            AppError::Conflict(e) => write!(f, "Conflict: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl StdError for AppError {}

impl AppError {
    /// Transient errors are eligible for retry with backoff; everything else
    /// is surfaced to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::ProviderTransient(_) | AppError::StoreTransient(_)
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration_error",
            AppError::Validation(_) => "validation_error",
            AppError::Parse(_) => "parse_error",
            AppError::FileFailed(_) => "file_failed",
            AppError::ProviderTransient(_) => "provider_transient",
            AppError::ProviderFatal(_) => "provider_fatal",
            AppError::StoreTransient(_) => "store_transient",
            AppError::StoreBadRequest(_) => "store_bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Serialization(_) => "serialization_error",
            AppError::Io(_) => "io_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::ProviderTransient("timeout".to_string()).is_transient());
        assert!(AppError::StoreTransient("503".to_string()).is_transient());
        assert!(!AppError::ProviderFatal("bad key".to_string()).is_transient());
        assert!(!AppError::StoreBadRequest("bad filter".to_string()).is_transient());
        assert!(!AppError::FileFailed("truncated".to_string()).is_transient());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = AppError::Configuration("QDRANT_URL must be a valid URL".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: QDRANT_URL must be a valid URL"
        );
    }
}
