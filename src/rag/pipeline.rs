//! Streaming pipeline: retrieval → composition → generation → persistence
//!
//! One request runs as one task. When history is enabled the task holds the
//! session's [`SessionHandle`] from history load through turn append, so
//! requests for the same session are serialized end to end while different
//! sessions run in parallel.
//!
//! Events reach the caller through a capacity-1 channel wrapped in an
//! [`EventStream`]. Dropping the stream cancels the request.

use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::errors::{RagError, Result};
use crate::generation::Generator;
use crate::knowledge::KnowledgeBase;
use crate::patient::{self, AutoRecordParser, PatientRecord, RecordParser};
use crate::rag::context::{ComposerConfig, ContextComposer, ResponseMode};
use crate::rag::retrieval::{RetrievalOrchestrator, RetrievalResult};
use crate::rag::state::{PipelineEvent, PipelineState};
use crate::retry::RetryPolicy;
use crate::session::{SessionHandle, SessionStore};
use crate::types::{AnalysisRequest, ResponseEvent, RetrievalMetadata, Turn};

/// Behaviour toggles and answer sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub history_enabled: bool,
    pub require_retrieval: bool,
    pub answer_max_tokens: u32,
    pub answer_temperature: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            history_enabled: true,
            require_retrieval: false,
            answer_max_tokens: 2000,
            answer_temperature: 0.3,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            history_enabled: config.session.history_enabled,
            require_retrieval: config.session.require_retrieval,
            answer_max_tokens: config.llm.max_tokens,
            answer_temperature: config.llm.answer_temperature,
        }
    }
}

/// Result of a completed request
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub answer: String,
    pub total_chunks: u64,
    pub retrieval: RetrievalMetadata,
    pub mode: ResponseMode,
    /// Sequence of the appended turn, if one was persisted
    pub persisted_sequence: Option<u64>,
}

#[derive(Clone)]
pub struct StreamingPipeline {
    orchestrator: Arc<RetrievalOrchestrator>,
    composer: ContextComposer,
    sessions: Arc<SessionStore>,
    generator: Arc<dyn Generator>,
    parser: Arc<dyn RecordParser>,
    default_knowledge: Arc<KnowledgeBase>,
    settings: PipelineSettings,
    retrieval_retry: RetryPolicy,
    generation_retry: RetryPolicy,
}

impl StreamingPipeline {
    pub fn new(
        orchestrator: Arc<RetrievalOrchestrator>,
        sessions: Arc<SessionStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            orchestrator,
            composer: ContextComposer::new(),
            sessions,
            generator,
            parser: Arc::new(AutoRecordParser::new()),
            default_knowledge: Arc::new(KnowledgeBase::default()),
            settings: PipelineSettings::default(),
            retrieval_retry: RetryPolicy::new(),
            generation_retry: RetryPolicy::new(),
        }
    }

    /// Settings, composer limits, record format and retrieval attempts from configuration
    pub fn configured(mut self, config: &Config) -> Self {
        self.settings = PipelineSettings::from(config);
        self.composer = ContextComposer::with_config(ComposerConfig::from(config));
        self.parser = patient::parser_for(config.patient.format);
        self.retrieval_retry = RetryPolicy::with_config(config.retrieval.max_attempts, 250);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_composer(mut self, composer: ContextComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_default_knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.default_knowledge = Arc::new(knowledge);
        self
    }

    pub fn with_record_parser(mut self, parser: Arc<dyn RecordParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_retry(mut self, retrieval: RetryPolicy, generation: RetryPolicy) -> Self {
        self.retrieval_retry = retrieval;
        self.generation_retry = generation;
        self
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start a request; events arrive on the returned stream
    ///
    /// Must be called within a Tokio runtime.
    pub fn stream(&self, request: AnalysisRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let pipeline = self.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            let _ = pipeline.run(request, token, Some(tx)).await;
        });

        EventStream {
            rx,
            cancel: cancel.clone(),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }

    /// Run a request to completion without an event stream
    pub async fn execute(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome> {
        self.run(request, cancel, None).await
    }

    /// RETRIEVING alone; session state is not touched
    pub async fn retrieve_only(&self, request: &AnalysisRequest) -> Result<RetrievalResult> {
        request.validate(false)?;
        self.retrieve(request, &CancellationToken::new()).await
    }

    #[instrument(
        skip(self, request, cancel, tx),
        fields(session_id = request.session_key().unwrap_or("-"), strategy = %request.retrieval_type)
    )]
    async fn run(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
        tx: Option<mpsc::Sender<ResponseEvent>>,
    ) -> Result<PipelineOutcome> {
        let mut state = PipelineState::Init;
        let result = self.drive(&mut state, &request, &cancel, &tx).await;

        match result {
            Ok(outcome) => {
                info!(chunks = outcome.total_chunks, hit = outcome.retrieval.knowledge_base_hit, "request completed");
                Ok(outcome)
            }
            Err(e) => {
                let from = state;
                state = state.transition(PipelineEvent::Failure).unwrap_or(PipelineState::Failed);
                match &e {
                    RagError::Cancelled => debug!(from = from.display_name(), "request cancelled"),
                    _ => warn!(from = from.display_name(), kind = e.kind(), error = %e, "request failed"),
                }

                if let Some(tx) = &tx {
                    if !cancel.is_cancelled() {
                        let _ = tx.send(ResponseEvent::error(&e)).await;
                    }
                }
                debug_assert_eq!(state, PipelineState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        state: &mut PipelineState,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
        tx: &Option<mpsc::Sender<ResponseEvent>>,
    ) -> Result<PipelineOutcome> {
        let settings = self.settings;

        // INIT
        request.validate(settings.history_enabled)?;
        let patient: Option<PatientRecord> = match &request.structured_patient_data {
            Some(data) => Some(self.parser.parse(data)?),
            None => None,
        };

        let mut session: Option<SessionHandle> = match request.session_key() {
            Some(key) if settings.history_enabled => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RagError::Cancelled),
                    handle = self.sessions.lock(key) => Some(handle),
                }
            }
            _ => None,
        };
        let history = session
            .as_ref()
            .map(SessionHandle::snapshot)
            .unwrap_or_default();
        *state = state.transition(PipelineEvent::Validated)?;

        // RETRIEVING
        let retrieval = self.retrieve(request, cancel).await?;
        *state = state.transition(PipelineEvent::Retrieved)?;

        // COMPOSING
        let prompt = self.composer.compose(
            &request.user_question,
            &retrieval,
            &history,
            patient.as_ref(),
            settings.history_enabled,
        );
        debug!(mode = ?prompt.mode, passages = prompt.passage_count, tokens = prompt.estimated_tokens, "prompt composed");
        *state = state.transition(PipelineEvent::Composed)?;

        // GENERATING
        let generation = prompt.to_request(settings.answer_max_tokens, settings.answer_temperature);
        let opening = self
            .generation_retry
            .execute("generation", cancel, |_| self.generator.stream(generation.clone()));
        let mut fragments = tokio::select! {
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            opened = opening => opened?,
        };

        emit(tx, cancel, ResponseEvent::start()).await?;

        let mut answer = String::new();
        let mut chunk_id = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                next = fragments.next() => next,
            };
            let fragment = match next {
                Some(fragment) => fragment?,
                None => break,
            };
            if fragment.is_empty() {
                continue;
            }
            chunk_id += 1;
            answer.push_str(&fragment);
            emit(tx, cancel, ResponseEvent::chunk(fragment, chunk_id)).await?;
        }
        drop(fragments);

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        *state = state.transition(PipelineEvent::StreamFinished)?;

        // FINALIZING: cancellation no longer applies
        let mut persisted_sequence = None;
        if let Some(handle) = session.as_mut() {
            let turn = Turn::new(
                request.user_question.trim(),
                &answer,
                patient.as_ref().map(PatientRecord::render),
                retrieval.metadata(),
            );
            if turn.answer.is_empty() {
                debug!("blank answer not persisted");
            } else {
                persisted_sequence = Some(handle.append_turn(turn).await);
            }
        }
        drop(session);

        if let Some(tx) = tx {
            let _ = tx.send(ResponseEvent::end(chunk_id)).await;
        }
        *state = state.transition(PipelineEvent::Persisted)?;

        Ok(PipelineOutcome {
            answer,
            total_chunks: chunk_id,
            retrieval: retrieval.metadata(),
            mode: prompt.mode,
            persisted_sequence,
        })
    }

    async fn retrieve(&self, request: &AnalysisRequest, cancel: &CancellationToken) -> Result<RetrievalResult> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        let knowledge = request
            .knowledge_base
            .as_ref()
            .unwrap_or(self.default_knowledge.as_ref());
        let require = self.settings.require_retrieval;

        let attempt = self.retrieval_retry.execute("retrieval", cancel, |_| {
            self.orchestrator.retrieve(
                &request.user_question,
                knowledge,
                request.retrieval_type,
                require,
            )
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(RagError::Cancelled),
            result = attempt => result,
        }
    }
}

async fn emit(
    tx: &Option<mpsc::Sender<ResponseEvent>>,
    cancel: &CancellationToken,
    event: ResponseEvent,
) -> Result<()> {
    let Some(tx) = tx else {
        return Ok(());
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RagError::Cancelled),
        sent = tx.send(event) => sent.map_err(|_| RagError::Cancelled),
    }
}

/// Ordered response events for one request
///
/// Ends after `end` or `error`. Dropping it cancels the request.
pub struct EventStream {
    rx: mpsc::Receiver<ResponseEvent>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl EventStream {
    /// Cancel without dropping the stream
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for EventStream {
    type Item = ResponseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
