//! Request shape consumed by the streaming pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{RagError, Result};
use crate::knowledge::KnowledgeBase;

/// Retrieval strategy selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RetrievalStrategy {
    /// Embedding similarity over an ephemeral index
    #[default]
    #[serde(rename = "vector")]
    Vector,
    /// Generation-driven passage extraction
    #[serde(rename = "llm", alias = "keyword")]
    Keyword,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Vector => "vector",
            RetrievalStrategy::Keyword => "llm",
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vector" => Ok(RetrievalStrategy::Vector),
            "llm" | "keyword" => Ok(RetrievalStrategy::Keyword),
            other => Err(RagError::Validation(format!(
                "Unknown retrieval_type '{}': expected 'vector' or 'llm'",
                other
            ))),
        }
    }
}

/// A single question for the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Corpus to retrieve from; the pipeline default is used when absent
    #[serde(default)]
    pub knowledge_base: Option<KnowledgeBase>,
    pub user_question: String,
    #[serde(default)]
    pub structured_patient_data: Option<serde_json::Value>,
    #[serde(default)]
    pub retrieval_type: RetrievalStrategy,
}

impl AnalysisRequest {
    pub fn new(user_question: impl Into<String>) -> Self {
        Self {
            user_question: user_question.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_knowledge_base(mut self, knowledge_base: KnowledgeBase) -> Self {
        self.knowledge_base = Some(knowledge_base);
        self
    }

    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.retrieval_type = strategy;
        self
    }

    pub fn with_patient_data(mut self, data: serde_json::Value) -> Self {
        self.structured_patient_data = Some(data);
        self
    }

    /// Session key, if present and non-blank
    pub fn session_key(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Reject malformed requests before any state is touched
    pub fn validate(&self, history_enabled: bool) -> Result<()> {
        if self.user_question.trim().is_empty() {
            return Err(RagError::Validation(
                "user_question must not be empty".to_string(),
            ));
        }

        if history_enabled && self.session_key().is_none() {
            return Err(RagError::Validation(
                "session_id is required when conversation history is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
