//! Incremental server-sent-events decoder for chat-completion streams
//!
//! Bytes arrive in arbitrary chunks; only complete lines are interpreted:
//! - `data: {json}` carries `choices[0].delta.content`
//! - `data: [DONE]` ends the stream
//! - comments (`:`), blank lines and other fields are ignored

use serde::Deserialize;

use crate::errors::{RagError, Result};

/// Maximum buffered bytes without a line break (1MB)
pub const MAX_BUFFER_SIZE: usize = 1_048_576;

/// Decoded stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    max_buffer_size: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFER_SIZE)
    }

    pub fn with_capacity(max_buffer_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_buffer_size,
        }
    }

    /// Feed bytes and return every event completed by them
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        if self.buffer.len() + bytes.len() > self.max_buffer_size {
            return Err(RagError::Generation(format!(
                "SSE buffer overflow: {} bytes exceeds maximum {}",
                self.buffer.len() + bytes.len(),
                self.max_buffer_size
            )));
        }
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(&line)? {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        Ok(events)
    }

    /// Interpret a trailing line left without a newline when the body ends
    pub fn finish(&mut self) -> Result<Option<SseEvent>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest))
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

fn parse_line(line: &str) -> Result<Option<SseEvent>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| RagError::Generation(format!("Malformed stream chunk: {}", e)))?;
    if let Some(error) = chunk.error {
        return Err(RagError::Generation(format!("Model reported error: {}", error)));
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty());
    Ok(content.map(SseEvent::Fragment))
}
