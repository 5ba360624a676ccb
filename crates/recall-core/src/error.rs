//! Error types for Recall

use thiserror::Error;

/// Result type alias using Recall's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Recall error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Graph errors (E001-E099)
    #[error("Graph query failed: {0}")]
    GraphQuery(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `recall config get llm.api_key`.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("No suitable model available: {0}")]
    NoSuitableModel(String),

    // Embedding errors (E200-E299)
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Request errors (E700-E799)
    #[error("Search cancelled by caller")]
    Cancelled,

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::GraphQuery(_) => "E001",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::NoSuitableModel(_) => "E103",
            Self::EmbeddingFailed(_) => "E200",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Cancelled => "E700",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E801",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("recall config get llm.api_key".to_string()),
            Self::EmbeddingFailed(_) => Some("recall config get embedding.model".to_string()),
            Self::DatabaseError(_) => Some("recall stats --owner <id>".to_string()),
            Self::ConfigError(_) => Some("recall config list".to_string()),
            _ => None,
        }
    }

    /// Whether the error comes from an unreachable upstream service rather than bad input
    ///
    /// A search fails with such an error when the graph answers none of its queries.
    pub fn is_upstream_outage(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::DatabaseError(_)
                | Self::GraphQuery(_)
                | Self::EmbeddingFailed(_)
                | Self::RateLimited(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::GraphQuery("x".into()).code(), "E001");
        assert_eq!(Error::EmbeddingFailed("x".into()).code(), "E200");
        assert_eq!(Error::Cancelled.code(), "E700");
        assert_eq!(Error::InvalidInput("x".into()).code(), "E800");
    }

    #[test]
    fn test_suggestions() {
        assert!(Error::ConfigError("bad".into()).suggestion().is_some());
        assert!(Error::Cancelled.suggestion().is_none());
    }

    #[test]
    fn test_upstream_outage_classification() {
        assert!(Error::GraphQuery("down".into()).is_upstream_outage());
        assert!(Error::EmbeddingFailed("down".into()).is_upstream_outage());
        assert!(!Error::InvalidInput("empty".into()).is_upstream_outage());
        assert!(!Error::Cancelled.is_upstream_outage());
    }
}
