//! Text generation capability
//!
//! The pipeline, keyword retrieval and session compaction all talk to a
//! language model through the [`Generator`] trait. The shipped implementation
//! is an OpenAI-compatible chat-completions client; tests substitute scripted
//! doubles.

pub mod client;
pub mod parser;
pub mod prompts;

pub use client::ChatCompletionsClient;
pub use parser::{SseDecoder, SseEvent};

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::errors::Result;

/// Lazy, ordered, finite sequence of answer fragments
///
/// Dropping the stream aborts the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One system + user exchange submitted to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 2000,
            temperature: 0.3,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Full completion text
    async fn complete(&self, request: GenerationRequest) -> Result<String>;

    /// Open a fragment stream
    ///
    /// An error here means no fragment was produced, so the caller is free to
    /// retry. Errors yielded by the stream itself are terminal.
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream>;
}
