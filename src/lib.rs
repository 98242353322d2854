//! medstream - session-aware retrieval-augmented medical question answering
//!
//! A question flows through the streaming pipeline: retrieval over a
//! knowledge base, prompt composition with conversation history and patient
//! data, then a streamed answer whose turn is appended to the session.
//!
//! # Architecture
//!
//! - **Core**: session store, retrieval, context composer, streaming pipeline
//! - **Capabilities**: embedding and generation behind traits
//! - **Interface**: CLI and REPL

pub mod errors;
pub mod types;

// Re-export commonly used types
pub use errors::{RagError, Result};

pub mod config;
pub mod telemetry;
pub mod retry;

// Inputs
pub mod knowledge;
pub mod patient;

// External capabilities
pub mod embedding;
pub mod generation;

// Core
pub mod session;
pub mod rag;

// Terminal front-end
pub mod cli;
pub mod repl;
