//! OpenAI-compatible chat-completions client
//!
//! Works against any server exposing `POST .../v1/chat/completions`
//! (vLLM, OpenRouter, llama.cpp server). Streaming uses SSE framing.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::errors::{RagError, Result};
use crate::generation::parser::{SseDecoder, SseEvent};
use crate::generation::{FragmentStream, GenerationRequest, Generator};

/// Default chat-completions endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1/chat/completions";

/// Default model
pub const DEFAULT_MODEL: &str = "deepseek-qwen7b";

#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_BASE_URL, DEFAULT_MODEL, None, Duration::from_secs(300))
    }

    pub fn with_config(
        url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(RagError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Build from configuration; the API key is read from `api_key_env`
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        Self::with_config(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }

    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&self.url).json(&self.body(request, stream));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RagError::BackendUnavailable(format!("Request to {} timed out", self.url))
            } else {
                RagError::BackendUnavailable(format!("Failed to send request: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(%status, "generation backend returned an error");
        Err(status_error(status, error_text))
    }
}

fn status_error(status: StatusCode, body: String) -> RagError {
    let message = format!("HTTP {}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RagError::BackendUnavailable(message)
    } else {
        RagError::Generation(message)
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct DecodeState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl DecodeState {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Fragment(text) => self.pending.push_back(text),
                SseEvent::Done => self.finished = true,
            }
        }
    }
}

fn fragments(bytes: ByteStream) -> FragmentStream {
    let state = DecodeState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.add_bytes(&chunk) {
                    Ok(events) => state.absorb(events),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(RagError::Generation(format!("Stream interrupted: {}", e))),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    match state.decoder.finish() {
                        Ok(Some(SseEvent::Fragment(text))) => state.pending.push_back(text),
                        Ok(_) => {}
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            }
        }
    });

    Box::pin(stream)
}

#[async_trait]
impl Generator for ChatCompletionsClient {
    async fn complete(&self, request: GenerationRequest) -> Result<String> {
        let response = self.send(&request, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("Failed to parse completion: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::Generation("Completion contained no choices".to_string()))?;
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream> {
        let response = self.send(&request, true).await?;
        debug!(model = %self.model, "generation stream opened");
        Ok(fragments(Box::pin(response.bytes_stream())))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
