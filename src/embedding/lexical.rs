//! Feature-hashed bag-of-words embeddings
//!
//! Deterministic and dependency free at runtime, which makes it the backend of
//! choice for offline use and tests. Similarity is word overlap, so it does not
//! capture paraphrase the way the BERT backend does.

use async_trait::async_trait;

use crate::embedding::engine::normalize;
use crate::embedding::Embedder;
use crate::errors::Result;

/// Default hashing dimension
pub const DEFAULT_DIMENSION: usize = 1024;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dimension: usize,
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed a single text synchronously
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(&token) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for LexicalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Lowercased content words
///
/// ASCII words shorter than two characters and stopwords are dropped. Runs of
/// non-ASCII letters (CJK text has no spaces) contribute one token per character.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if word.is_ascii() {
            if word.len() > 1 && !is_stopword(word) {
                tokens.push(word.to_string());
            }
        } else {
            let mut ascii_run = String::new();
            for c in word.chars() {
                if c.is_ascii() {
                    ascii_run.push(c);
                    continue;
                }
                if ascii_run.len() > 1 && !is_stopword(&ascii_run) {
                    tokens.push(std::mem::take(&mut ascii_run));
                }
                ascii_run.clear();
                tokens.push(c.to_string());
            }
            if ascii_run.len() > 1 && !is_stopword(&ascii_run) {
                tokens.push(ascii_run);
            }
        }
    }
    tokens
}

fn fnv1a(token: &str) -> u64 {
    token
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "the" | "is" | "at" | "which" | "on" | "in" | "and" | "or" | "but" | "to" | "for"
            | "of" | "with" | "by" | "from" | "as" | "an" | "be" | "this" | "that" | "it"
            | "are" | "was" | "were" | "been" | "has" | "have" | "had" | "do" | "does"
            | "did" | "will" | "would" | "should" | "could" | "can" | "may" | "might"
            | "must" | "what" | "how" | "when" | "where" | "who" | "why" | "my" | "me"
            | "you" | "your" | "we" | "our" | "they" | "their" | "its" | "if" | "so"
            | "about" | "any" | "some" | "all" | "not" | "no"
    )
}
