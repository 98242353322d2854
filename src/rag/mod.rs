//! Retrieval-augmented answering
//!
//! Components:
//! - Retrieval: strategy dispatch over an ephemeral index or the model
//! - Context: prompt assembly per response mode
//! - State: request state machine
//! - Pipeline: end-to-end streaming orchestration

pub mod context;
pub mod pipeline;
pub mod retrieval;
pub mod state;

pub use context::{ComposedPrompt, ComposerConfig, ContextComposer, ResponseMode};
pub use pipeline::{EventStream, PipelineOutcome, PipelineSettings, StreamingPipeline};
pub use retrieval::{RetrievalOrchestrator, RetrievalResult, ScoredPassage, SearchParams};
pub use state::{PipelineEvent, PipelineState};
