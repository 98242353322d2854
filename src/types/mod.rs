//! Type definitions module
//!
//! Core records shared by the session store, retrieval and the pipeline.

pub mod events;
pub mod request;
pub mod session;

// Re-export commonly used types
pub use events::{ResponseEvent, RESPONSE_TYPE};
pub use request::{AnalysisRequest, RetrievalStrategy};
pub use session::{
    strip_reasoning, RetrievalMetadata, SessionSnapshot, Summary, SummarySource, Turn, TurnRange,
};
