//! Conversation memory
//!
//! - Store: per-key serialized session records in a concurrent map
//! - Compaction: the oldest batch of turns becomes one summary

pub mod compaction;
pub mod store;

pub use compaction::{parse_summary, Compactor};
pub use store::{RetentionPolicy, SessionHandle, SessionRecord, SessionStore};
