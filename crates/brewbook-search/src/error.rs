//! Search index error types.

use brewbook_storage::FetchError;
use thiserror::Error;

/// Errors from every search index operation, whichever provider backs it.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Records or arguments rejected before reaching the provider.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Transport failure after retries.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The search service answered with a non-success status.
    #[error("Search API error: {status} {message}")]
    ApiError { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A task did not reach the published state in time.
    #[error("Task {task_id} still pending after {attempts} checks")]
    TaskTimeout { task_id: u64, attempts: u32 },
}

impl SearchIndexError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<FetchError> for SearchIndexError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, body, .. } => Self::api(status, body),
            FetchError::Decode { url, source } => Self::parse(format!("{url}: {source}")),
            other => Self::connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SearchIndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
