//! Ephemeral flat similarity index
//!
//! Built per call over one corpus and dropped afterwards. Exhaustive cosine
//! scoring is exact, and corpora handed in with a request are small.

use std::cmp::Ordering;

use crate::embedding::Embedder;
use crate::errors::{RagError, Result};
use crate::knowledge::KnowledgePassage;

/// A passage and its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub passage: KnowledgePassage,
    pub score: f32,
}

struct IndexEntry {
    passage: KnowledgePassage,
    vector: Vec<f32>,
}

pub struct FlatIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
}

impl FlatIndex {
    /// Embed every passage
    pub async fn build(embedder: &dyn Embedder, passages: Vec<KnowledgePassage>) -> Result<Self> {
        let dimension = embedder.dimension();
        if passages.is_empty() {
            return Ok(Self {
                entries: Vec::new(),
                dimension,
            });
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != passages.len() {
            return Err(RagError::IndexUnavailable(format!(
                "embedder returned {} vectors for {} passages",
                vectors.len(),
                passages.len()
            )));
        }

        let entries = passages
            .into_iter()
            .zip(vectors)
            .map(|(passage, vector)| {
                if vector.len() == dimension {
                    Ok(IndexEntry { passage, vector })
                } else {
                    Err(RagError::IndexUnavailable(format!(
                        "vector dimension {} does not match embedder dimension {}",
                        vector.len(),
                        dimension
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries, dimension })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every passage scored, best first; equal scores keep corpus order
    pub fn rank(&self, query: &[f32]) -> Result<Vec<IndexHit>> {
        if query.len() != self.dimension {
            return Err(RagError::IndexUnavailable(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .map(|entry| IndexHit {
                passage: entry.passage.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        // sort_by is stable
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(hits)
    }

    /// At most `top_k` passages scoring at least `threshold`
    pub fn query(&self, query: &[f32], top_k: usize, threshold: f32) -> Result<Vec<IndexHit>> {
        let mut hits = self.rank(query)?;
        hits.retain(|hit| hit.score >= threshold);
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Cosine similarity; 0.0 when either vector is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
