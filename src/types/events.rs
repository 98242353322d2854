//! Response events delivered to the caller
//!
//! A successful request yields `Start`, zero or more `Chunk`s and `End`.
//! A failed request yields exactly one `Error` in place of `End`.

use serde_json::{json, Value};

use crate::errors::RagError;

/// Response type label carried by start/end events
pub const RESPONSE_TYPE: &str = "medical_analysis";

/// One event of the ordered response stream
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Start {
        response_type: String,
        message: String,
    },
    Chunk {
        content: String,
        /// Strictly increasing from 1
        chunk_id: u64,
    },
    End {
        response_type: String,
        message: String,
        total_chunks: u64,
    },
    Error {
        kind: String,
        error: String,
    },
}

impl ResponseEvent {
    pub fn start() -> Self {
        ResponseEvent::Start {
            response_type: RESPONSE_TYPE.to_string(),
            message: format!("{} started", RESPONSE_TYPE),
        }
    }

    pub fn chunk(content: impl Into<String>, chunk_id: u64) -> Self {
        ResponseEvent::Chunk {
            content: content.into(),
            chunk_id,
        }
    }

    pub fn end(total_chunks: u64) -> Self {
        ResponseEvent::End {
            response_type: RESPONSE_TYPE.to_string(),
            message: format!("{} completed", RESPONSE_TYPE),
            total_chunks,
        }
    }

    pub fn error(err: &RagError) -> Self {
        ResponseEvent::Error {
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            ResponseEvent::Start { .. } => "start",
            ResponseEvent::Chunk { .. } => "chunk",
            ResponseEvent::End { .. } => "end",
            ResponseEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseEvent::End { .. } | ResponseEvent::Error { .. })
    }

    /// JSON payload of the event
    pub fn payload(&self) -> Value {
        match self {
            ResponseEvent::Start {
                response_type,
                message,
            } => json!({ "type": response_type, "message": message }),
            ResponseEvent::Chunk { content, chunk_id } => {
                json!({ "content": content, "chunk_id": chunk_id })
            }
            ResponseEvent::End {
                response_type,
                message,
                total_chunks,
            } => json!({
                "type": response_type,
                "message": message,
                "total_chunks": total_chunks,
            }),
            ResponseEvent::Error { kind, error } => json!({ "kind": kind, "error": error }),
        }
    }

    /// Render as a Server-Sent Events frame
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.payload())
    }
}
