//! Retrieval orchestrator: one entry point, two strategies
//!
//! VECTOR embeds the corpus into a fresh [`FlatIndex`] and ranks by cosine
//! similarity. KEYWORD asks the generation capability to quote the relevant
//! entries. Neither strategy retries internally.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::{LlmConfig, RetrievalConfig};
use crate::embedding::Embedder;
use crate::errors::{RagError, Result};
use crate::generation::prompts::{
    build_retrieval_prompt, LEGACY_NO_MATCH_SENTINEL, NO_MATCH_SENTINEL, RETRIEVAL_SYSTEM_PROMPT,
};
use crate::generation::{GenerationRequest, Generator};
use crate::knowledge::{KnowledgeBase, PassageMetadata};
use crate::rag::retrieval::index::FlatIndex;
use crate::types::{strip_reasoning, RetrievalMetadata, RetrievalStrategy};

/// Search parameters for retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of passages returned
    pub top_k: usize,
    /// Minimum similarity for a VECTOR passage to count
    pub threshold: f32,
    /// Prepended to the question before embedding
    pub query_prefix: Option<String>,
    /// Deadline for the KEYWORD generation call
    pub keyword_timeout: Duration,
    pub keyword_max_tokens: u32,
    pub keyword_temperature: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            query_prefix: None,
            keyword_timeout: Duration::from_secs(60),
            keyword_max_tokens: 2000,
            keyword_temperature: 0.1,
        }
    }
}

impl SearchParams {
    pub fn from_config(retrieval: &RetrievalConfig, llm: &LlmConfig) -> Self {
        Self {
            top_k: retrieval.top_k,
            threshold: retrieval.threshold,
            query_prefix: retrieval.query_prefix.clone(),
            keyword_timeout: Duration::from_secs(retrieval.timeout_secs),
            keyword_max_tokens: llm.max_tokens,
            keyword_temperature: llm.retrieval_temperature,
        }
    }
}

/// One retrieved passage; KEYWORD passages carry no score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub text: String,
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: PassageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
    pub strategy: RetrievalStrategy,
    pub hit: bool,
}

impl RetrievalResult {
    pub fn empty(strategy: RetrievalStrategy) -> Self {
        Self {
            passages: Vec::new(),
            strategy,
            hit: false,
        }
    }

    pub fn metadata(&self) -> RetrievalMetadata {
        RetrievalMetadata {
            strategy_used: self.strategy,
            knowledge_base_hit: self.hit,
        }
    }
}

pub struct RetrievalOrchestrator {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    params: SearchParams,
}

impl RetrievalOrchestrator {
    pub fn new(embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Self {
        Self::with_params(embedder, generator, SearchParams::default())
    }

    pub fn with_params(
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        params: SearchParams,
    ) -> Self {
        Self {
            embedder,
            generator,
            params,
        }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Run `strategy` over `knowledge_base`
    ///
    /// With `require_retrieval` set, a miss fails with `RetrievalRequired`
    /// instead of returning an empty result.
    #[instrument(skip(self, question, knowledge_base))]
    pub async fn retrieve(
        &self,
        question: &str,
        knowledge_base: &KnowledgeBase,
        strategy: RetrievalStrategy,
        require_retrieval: bool,
    ) -> Result<RetrievalResult> {
        let result = match strategy {
            RetrievalStrategy::Vector => self.vector(question, knowledge_base).await?,
            RetrievalStrategy::Keyword => self.keyword(question, knowledge_base).await?,
        };

        info!(passages = result.passages.len(), hit = result.hit, "retrieval complete");

        if require_retrieval && !result.hit {
            return Err(RagError::RetrievalRequired {
                strategy: strategy.as_str().to_string(),
            });
        }
        Ok(result)
    }

    async fn vector(&self, question: &str, knowledge_base: &KnowledgeBase) -> Result<RetrievalResult> {
        let passages = knowledge_base.passages();
        if passages.is_empty() {
            debug!("empty corpus");
            return Ok(RetrievalResult::empty(RetrievalStrategy::Vector));
        }

        let index = FlatIndex::build(self.embedder.as_ref(), passages).await?;

        let query_text = match &self.params.query_prefix {
            Some(prefix) => format!("{}{}", prefix, question.trim()),
            None => question.trim().to_string(),
        };
        let query = self
            .embedder
            .embed_batch(&[query_text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::IndexUnavailable("embedder returned no query vector".to_string()))?;

        let hits = index.query(&query, self.params.top_k, self.params.threshold)?;
        debug!(
            indexed = index.len(),
            best = hits.first().map(|h| h.score),
            "vector search ranked"
        );

        let passages: Vec<ScoredPassage> = hits
            .into_iter()
            .map(|hit| ScoredPassage {
                text: hit.passage.text,
                score: Some(hit.score),
                metadata: hit.passage.metadata,
            })
            .collect();

        Ok(RetrievalResult {
            hit: !passages.is_empty(),
            passages,
            strategy: RetrievalStrategy::Vector,
        })
    }

    async fn keyword(&self, question: &str, knowledge_base: &KnowledgeBase) -> Result<RetrievalResult> {
        let passages = knowledge_base.passages();
        if passages.is_empty() {
            debug!("empty corpus");
            return Ok(RetrievalResult::empty(RetrievalStrategy::Keyword));
        }

        let request = GenerationRequest::new(
            RETRIEVAL_SYSTEM_PROMPT,
            build_retrieval_prompt(question, &passages),
        )
        .with_max_tokens(self.params.keyword_max_tokens)
        .with_temperature(self.params.keyword_temperature);

        let timeout = self.params.keyword_timeout;
        let reply = tokio::time::timeout(timeout, self.generator.complete(request))
            .await
            .map_err(|_| RagError::RetrievalTimeout {
                duration_ms: timeout.as_millis() as u64,
            })??;

        let passages: Vec<ScoredPassage> = parse_keyword_reply(&reply)
            .into_iter()
            .map(|text| ScoredPassage {
                text,
                score: None,
                metadata: PassageMetadata::default(),
            })
            .collect();

        Ok(RetrievalResult {
            hit: !passages.is_empty(),
            passages,
            strategy: RetrievalStrategy::Keyword,
        })
    }
}

/// Passages quoted by the model; empty when it reported no match
///
/// Bullet lines become individual passages. A reply with no bullets is taken
/// whole.
pub fn parse_keyword_reply(reply: &str) -> Vec<String> {
    let text = strip_reasoning(reply);
    if is_no_match(&text) {
        return Vec::new();
    }

    let bullets: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))
        })
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_no_match(line))
        .map(str::to_string)
        .collect();

    if bullets.is_empty() {
        vec![text]
    } else {
        bullets
    }
}

fn is_no_match(text: &str) -> bool {
    let normalized = text
        .trim_start_matches(|c: char| c == '>' || c == '-' || c == '*' || c.is_whitespace())
        .trim_end();
    normalized.is_empty()
        || normalized.starts_with(NO_MATCH_SENTINEL)
        || normalized.contains(LEGACY_NO_MATCH_SENTINEL)
}
