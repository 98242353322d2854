//! Retrieval over a knowledge corpus
//!
//! - Index: ephemeral flat cosine index, rebuilt per call
//! - Engine: strategy dispatch, keyword reply parsing, required-hit rule

pub mod engine;
pub mod index;

pub use engine::{parse_keyword_reply, RetrievalOrchestrator, RetrievalResult, ScoredPassage, SearchParams};
pub use index::{cosine_similarity, FlatIndex, IndexHit};
