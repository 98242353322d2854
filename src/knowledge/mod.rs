//! Knowledge corpora consumed by retrieval
//!
//! Corpora arrive as plain passages or as structured guideline documents and
//! are flattened into [`KnowledgePassage`]s before indexing.

pub mod corpus;

pub use corpus::{Guideline, GuidelineSet, KnowledgeBase, KnowledgePassage, PassageMetadata};

use std::path::Path;

use crate::errors::{RagError, Result};

/// Load a corpus from a JSON file
pub fn load_from_file(path: &Path) -> Result<KnowledgeBase> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        RagError::Config(format!(
            "Failed to parse knowledge base {}: {}",
            path.display(),
            e
        ))
    })
}
