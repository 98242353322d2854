//! Text embedding capability used by vector retrieval
//!
//! The similarity search treats an [`Embedder`] as a black box. Two
//! implementations ship with the crate:
//! - [`BertEmbedder`]: sentence-transformer weights run locally via Candle
//! - [`LexicalEmbedder`]: feature-hashed bag of words, no model download

pub mod engine;
pub mod lexical;

pub use engine::{BertEmbedder, DEFAULT_MODEL_ID};
pub use lexical::LexicalEmbedder;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::errors::Result;

/// Produces one vector per input text
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; an unavailable backend fails with `IndexUnavailable`
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimension
    fn dimension(&self) -> usize;
}

/// Build the embedder selected by configuration
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Bert => Ok(Arc::new(BertEmbedder::load(&config.model_id)?)),
        EmbeddingBackend::Lexical => Ok(Arc::new(LexicalEmbedder::new())),
    }
}
