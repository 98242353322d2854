//! Shared test doubles for the integration tests
//!
//! Nothing here touches the network or downloads a model.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use medstream::embedding::{Embedder, LexicalEmbedder};
use medstream::generation::{FragmentStream, GenerationRequest, Generator};
use medstream::knowledge::{Guideline, KnowledgeBase};
use medstream::rag::{PipelineSettings, RetrievalOrchestrator, SearchParams, StreamingPipeline};
use medstream::retry::RetryPolicy;
use medstream::session::{Compactor, RetentionPolicy, SessionStore};
use medstream::types::{ResponseEvent, RetrievalMetadata, Turn};
use medstream::{RagError, Result};

/// Summary reply with all three sections
pub const SUMMARY_REPLY: &str = "<UserIntentSummary>\n- asked about blood pressure\n</UserIntentSummary>\n<HealthStatusChanges>\n- none reported\n</HealthStatusChanges>\n<SystemResponseConclusions>\n- reduce salt\n</SystemResponseConclusions>";

/// Generator double with scripted replies
///
/// `complete` pops queued replies and falls back to [`SUMMARY_REPLY`].
/// `stream` yields the configured fragments, optionally failing to open a
/// number of times or breaking after some fragments.
pub struct ScriptedGenerator {
    completions: Mutex<VecDeque<Result<String>>>,
    fragments: Vec<String>,
    open_failures: AtomicUsize,
    fail_after: Option<usize>,
    fragment_delay: Option<Duration>,
    completion_delay: Option<Duration>,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    stream_requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            open_failures: AtomicUsize::new(0),
            fail_after: None,
            fragment_delay: None,
            completion_delay: None,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            stream_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_completion(self, reply: Result<String>) -> Self {
        self.completions.lock().unwrap().push_back(reply);
        self
    }

    /// Fail the first `count` stream opens with a retryable error
    pub fn with_open_failures(self, count: usize) -> Self {
        self.open_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Yield `count` fragments, then a generation error
    pub fn with_failure_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = Some(delay);
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Prompts submitted for streaming, in order
    pub fn stream_requests(&self) -> Vec<GenerationRequest> {
        self.stream_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, _request: GenerationRequest) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.completion_delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.completions.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(SUMMARY_REPLY.to_string()))
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_requests.lock().unwrap().push(request);

        let remaining = self.open_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.open_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RagError::BackendUnavailable("scripted outage".to_string()));
        }

        let mut items: Vec<Result<String>> = match self.fail_after {
            Some(count) => self.fragments.iter().take(count).cloned().map(Ok).collect(),
            None => self.fragments.iter().cloned().map(Ok).collect(),
        };
        if self.fail_after.is_some() {
            items.push(Err(RagError::Generation("connection reset".to_string())));
        }

        let delay = self.fragment_delay;
        let stream = futures_util::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

/// Embedder that is always down
pub struct UnavailableEmbedder {
    pub calls: AtomicUsize,
}

impl UnavailableEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RagError::IndexUnavailable("model not loaded".to_string()))
    }

    fn dimension(&self) -> usize {
        384
    }
}

/// Hypertension guideline; only the diet passage mentions eating
pub fn hypertension_kb() -> KnowledgeBase {
    let recommendations = vec![
        (
            "diet".to_string(),
            vec!["Eat more vegetables, fruit and whole grains; limit salt to 5 g per day".to_string()],
        ),
        (
            "exercise".to_string(),
            vec!["Walk 30 minutes on most days".to_string()],
        ),
    ];

    KnowledgeBase::Guideline(Guideline {
        condition: "Hypertension".to_string(),
        description: Some("Persistently elevated blood pressure in the arteries".to_string()),
        symptoms: vec!["Headache".to_string(), "Dizziness".to_string()],
        diagnosis: vec!["Blood pressure above 140/90 mmHg on repeated measurement".to_string()],
        recommendations,
        risk_factors: vec!["Family history of high blood pressure".to_string()],
        ..Default::default()
    })
}

/// Search parameters tuned for the lexical embedder
pub fn lexical_params() -> SearchParams {
    SearchParams {
        threshold: 0.1,
        keyword_timeout: Duration::from_millis(200),
        ..SearchParams::default()
    }
}

pub fn orchestrator(generator: Arc<ScriptedGenerator>) -> RetrievalOrchestrator {
    RetrievalOrchestrator::with_params(Arc::new(LexicalEmbedder::new()), generator, lexical_params())
}

pub fn store(generator: Arc<ScriptedGenerator>) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(
        Compactor::new(generator),
        RetentionPolicy::default(),
    ))
}

/// Pipeline over the lexical embedder and `generator`, with fast retries
pub fn pipeline(generator: Arc<ScriptedGenerator>, settings: PipelineSettings) -> StreamingPipeline {
    pipeline_with_embedder(Arc::new(LexicalEmbedder::new()), generator, settings)
}

pub fn pipeline_with_embedder(
    embedder: Arc<dyn Embedder>,
    generator: Arc<ScriptedGenerator>,
    settings: PipelineSettings,
) -> StreamingPipeline {
    let fast_retry = RetryPolicy::with_config(2, 1);
    let orchestrator = RetrievalOrchestrator::with_params(embedder, generator.clone(), lexical_params());
    StreamingPipeline::new(
        Arc::new(orchestrator),
        store(generator.clone()),
        generator,
    )
    .with_settings(settings)
    .with_default_knowledge(hypertension_kb())
    .with_retry(fast_retry.clone(), fast_retry)
}

pub fn turn(i: usize) -> Turn {
    Turn::new(format!("q{}", i), format!("a{}", i), None, RetrievalMetadata::default())
}

/// Drain an event stream
pub async fn collect(mut events: medstream::rag::EventStream) -> Vec<ResponseEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}
