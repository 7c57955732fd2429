use chrono::{DateTime, Utc};
use marketplace_cache::CacheError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections at the catalog ingestion boundary
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("invalid catalog entry: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] CacheError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("invalid section config: {0}")]
    InvalidConfig(String),

    #[error("generation failed for section {section_id}: {message}")]
    Generation { section_id: String, message: String },

    #[error("deduplication failed: {0}")]
    Deduplication(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Failure classes surfaced in a generation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SectionGenerationFailed,
    DeduplicationFailed,
    GenerationFailed,
    RefreshFailed,
}

impl ErrorCode {
    /// Informational recovery description attached to every report
    pub fn recovery_strategy(&self) -> &'static str {
        match self {
            ErrorCode::SectionGenerationFailed => {
                "Section omitted from the result; remaining sections are served"
            }
            ErrorCode::DeduplicationFailed => {
                "Generated sections discarded; configured fallback strategy applied"
            }
            ErrorCode::GenerationFailed => "Configured fallback strategy applied",
            ErrorCode::RefreshFailed => "Previously cached sections remain in place",
        }
    }
}

/// Serialisable error report. Never thrown to callers of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub code: ErrorCode,
    pub message: String,
    pub context: String,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub recovery_strategy: String,
}

impl PipelineError {
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        context: impl Into<String>,
        user_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
            user_id: user_id.map(str::to_string),
            timestamp,
            recovery_strategy: code.recovery_strategy().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_carries_recovery_strategy() {
        let err = PipelineError::new(
            ErrorCode::SectionGenerationFailed,
            "boom",
            "section:trending",
            Some("u1"),
            Utc::now(),
        );
        assert_eq!(
            err.recovery_strategy,
            ErrorCode::SectionGenerationFailed.recovery_strategy()
        );
        assert_eq!(err.user_id.as_deref(), Some("u1"));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "SECTION_GENERATION_FAILED");
    }

    #[test]
    fn test_service_error_from_catalog() {
        let err: ServiceError = CatalogError::Unavailable("down".to_string()).into();
        assert!(err.to_string().contains("down"));
    }
}
