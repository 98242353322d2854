//! Error types for medstream
//!
//! Every component reports failures through [`RagError`]. The streaming
//! pipeline is the only place that turns an error into a terminal event.

use thiserror::Error;

/// Main error type for the question-answering core
#[derive(Error, Debug)]
pub enum RagError {
    /// Malformed or missing request fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Retrieval was mandatory and produced no hit
    #[error("Retrieval required but no relevant passage was found ({strategy} strategy)")]
    RetrievalRequired { strategy: String },

    /// Similarity search backend (embedder or index) unavailable
    #[error("Similarity index unavailable: {0}")]
    IndexUnavailable(String),

    /// Keyword retrieval did not answer in time
    #[error("Retrieval timed out after {duration_ms}ms")]
    RetrievalTimeout { duration_ms: u64 },

    /// Generation capability unreachable or refused the request
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Conversation summarization failed (logged, never surfaced)
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// Generation stream broke after it had started
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Pipeline state machine violation
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String),
}

impl RagError {
    /// Stable machine-readable code carried by terminal error events
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "validation_error",
            RagError::RetrievalRequired { .. } => "retrieval_required",
            RagError::IndexUnavailable(_) => "index_unavailable",
            RagError::RetrievalTimeout { .. } => "retrieval_timeout",
            RagError::BackendUnavailable(_) | RagError::Http(_) => "backend_unavailable",
            RagError::Summarization(_) => "summarization_failure",
            RagError::Generation(_) => "generation_failed",
            RagError::Cancelled => "cancelled",
            RagError::Config(_) => "config_error",
            RagError::Serialization(_) => "serialization_error",
            RagError::Io(_) => "io_error",
            RagError::InvalidTransition { .. } | RagError::Generic(_) => "internal_error",
        }
    }

    /// Whether the pipeline may make one more attempt after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::IndexUnavailable(_)
                | RagError::RetrievalTimeout { .. }
                | RagError::BackendUnavailable(_)
        )
    }
}

/// Result type alias for medstream operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Convert anyhow errors to RagError
impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Generic(err.to_string())
    }
}
