//! Integration tests for the streaming pipeline
//!
//! Event ordering, response modes, failure handling, cancellation and
//! persistence, all against scripted doubles.

mod common;

use common::{collect, pipeline, pipeline_with_embedder, ScriptedGenerator, UnavailableEmbedder};
use futures_util::StreamExt;
use medstream::generation::prompts::{BASE_SYSTEM_PROMPT, ENHANCEMENT_SYSTEM_PROMPT};
use medstream::rag::{PipelineSettings, ResponseMode};
use medstream::types::{AnalysisRequest, ResponseEvent, RetrievalStrategy, Turn};
use medstream::RagError;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn with_history() -> PipelineSettings {
    PipelineSettings::default()
}

fn without_history() -> PipelineSettings {
    PipelineSettings {
        history_enabled: false,
        ..PipelineSettings::default()
    }
}

fn error_kind(events: &[ResponseEvent]) -> Option<&str> {
    events.iter().find_map(|e| match e {
        ResponseEvent::Error { kind, .. } => Some(kind.as_str()),
        _ => None,
    })
}

fn chunk_count(events: &[ResponseEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ResponseEvent::Chunk { .. }))
        .count()
}

#[tokio::test]
async fn test_events_are_ordered_and_turn_is_persisted() {
    let generator = Arc::new(ScriptedGenerator::new(&["Eat ", "more ", "vegetables."]));
    let pipeline = pipeline(generator.clone(), with_history());

    let events = collect(pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"))).await;

    assert_eq!(events.len(), 5);
    assert_eq!(events[0], ResponseEvent::start());
    for (i, event) in events[1..4].iter().enumerate() {
        match event {
            ResponseEvent::Chunk { chunk_id, .. } => assert_eq!(*chunk_id, i as u64 + 1),
            other => panic!("expected chunk, got {:?}", other),
        }
    }
    assert_eq!(events[4], ResponseEvent::end(3));

    // `end` is only sent after the append
    let history = pipeline.sessions().get_history("s1").await;
    assert_eq!(history.turns.len(), 1);
    let turn = &history.turns[0];
    assert_eq!(turn.question, "What should I eat?");
    assert_eq!(turn.answer, "Eat more vegetables.");
    assert_eq!(turn.sequence, 1);
    assert!(turn.retrieval_metadata.knowledge_base_hit);
    assert_eq!(turn.retrieval_metadata.strategy_used, RetrievalStrategy::Vector);
    assert_eq!(generator.stream_calls(), 1);
}

#[tokio::test]
async fn test_required_retrieval_miss_emits_only_error() {
    let generator = Arc::new(ScriptedGenerator::new(&["should not stream"]));
    let settings = PipelineSettings {
        require_retrieval: true,
        ..with_history()
    };
    let pipeline = pipeline(generator.clone(), settings);

    let events = collect(pipeline.stream(AnalysisRequest::new("How do I fix a gearbox?").with_session("s1"))).await;

    assert_eq!(events.len(), 1);
    assert_eq!(error_kind(&events), Some("retrieval_required"));
    assert_eq!(chunk_count(&events), 0);
    assert_eq!(generator.stream_calls(), 0);
    assert!(pipeline.sessions().get_history("s1").await.is_empty());
}

#[tokio::test]
async fn test_history_without_hit_composes_history_only() {
    let generator = Arc::new(ScriptedGenerator::new(&["Please see a mechanic."]));
    let pipeline = pipeline(generator.clone(), with_history());
    pipeline
        .sessions()
        .append_turn(
            "s1",
            Turn::new("Is 150/95 high?", "Yes, that is stage 2 hypertension.", None, Default::default()),
        )
        .await;

    let outcome = pipeline
        .execute(
            AnalysisRequest::new("How do I fix a gearbox?").with_session("s1"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.mode, ResponseMode::HistoryOnly);
    assert!(!outcome.retrieval.knowledge_base_hit);

    let request = &generator.stream_requests()[0];
    assert!(request.user.contains("<conversation_history>"));
    assert!(request.user.contains("Question: Is 150/95 high?"));
    assert!(!request.user.contains("<retrieved_knowledge>"));
    assert_eq!(request.system, BASE_SYSTEM_PROMPT);
}

#[tokio::test]
async fn test_hit_with_history_puts_passages_first() {
    let generator = Arc::new(ScriptedGenerator::new(&["Reduce salt."]));
    let pipeline = pipeline(generator.clone(), with_history());
    pipeline
        .sessions()
        .append_turn("s1", Turn::new("Is 150/95 high?", "Yes.", None, Default::default()))
        .await;

    let outcome = pipeline
        .execute(
            AnalysisRequest::new("What should I eat?").with_session("s1"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.mode, ResponseMode::RetrievalWithHistory);
    assert_eq!(outcome.persisted_sequence, Some(2));

    let request = &generator.stream_requests()[0];
    let knowledge = request.user.find("<retrieved_knowledge>").unwrap();
    let history = request.user.find("<conversation_history>").unwrap();
    let question = request.user.find("<user_question>").unwrap();
    assert!(knowledge < history && history < question);
    assert!(request.user.contains("1. Hypertension diet recommendation"));
    assert_eq!(request.system, ENHANCEMENT_SYSTEM_PROMPT);
}

#[tokio::test]
async fn test_history_disabled_needs_no_session_and_persists_nothing() {
    let generator = Arc::new(ScriptedGenerator::new(&["Vegetables."]));
    let pipeline = pipeline(generator.clone(), without_history());

    let outcome = pipeline
        .execute(AnalysisRequest::new("What should I eat?"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.mode, ResponseMode::RetrievalOnly);
    assert_eq!(outcome.persisted_sequence, None);
    assert!(pipeline.sessions().is_empty());
    assert!(!generator.stream_requests()[0].user.contains("<conversation_history>"));
}

#[tokio::test]
async fn test_question_only_mode() {
    let generator = Arc::new(ScriptedGenerator::new(&["No idea."]));
    let pipeline = pipeline(generator.clone(), without_history());

    let outcome = pipeline
        .execute(AnalysisRequest::new("How do I fix a gearbox?"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.mode, ResponseMode::QuestionOnly);
    assert_eq!(
        generator.stream_requests()[0].user,
        "<user_question>\nHow do I fix a gearbox?\n</user_question>"
    );
}

#[tokio::test]
async fn test_validation_errors() {
    let generator = Arc::new(ScriptedGenerator::new(&["x"]));
    let pipeline = pipeline(generator.clone(), with_history());

    let blank = collect(pipeline.stream(AnalysisRequest::new("   ").with_session("s1"))).await;
    assert_eq!(blank.len(), 1);
    assert_eq!(error_kind(&blank), Some("validation_error"));

    let missing_session = collect(pipeline.stream(AnalysisRequest::new("What should I eat?"))).await;
    assert_eq!(error_kind(&missing_session), Some("validation_error"));

    let bad_patient = collect(
        pipeline.stream(
            AnalysisRequest::new("What should I eat?")
                .with_session("s1")
                .with_patient_data(json!("not a record")),
        ),
    )
    .await;
    assert_eq!(error_kind(&bad_patient), Some("validation_error"));

    assert_eq!(generator.stream_calls(), 0);
    assert!(pipeline.sessions().get_history("s1").await.is_empty());
}

#[tokio::test]
async fn test_open_failure_is_retried_once() {
    let generator = Arc::new(ScriptedGenerator::new(&["Eat ", "vegetables."]).with_open_failures(1));
    let pipeline = pipeline(generator.clone(), with_history());

    let events = collect(pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"))).await;

    let starts = events
        .iter()
        .filter(|e| matches!(e, ResponseEvent::Start { .. }))
        .count();
    assert_eq!(starts, 1);
    assert_eq!(events.last(), Some(&ResponseEvent::end(2)));
    assert_eq!(generator.stream_calls(), 2);
}

#[tokio::test]
async fn test_open_failures_exhausted_is_terminal() {
    let generator = Arc::new(ScriptedGenerator::new(&["never"]).with_open_failures(5));
    let pipeline = pipeline(generator.clone(), with_history());

    let events = collect(pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"))).await;

    assert_eq!(events.len(), 1);
    assert_eq!(error_kind(&events), Some("backend_unavailable"));
    assert_eq!(generator.stream_calls(), 2);
    assert!(pipeline.sessions().get_history("s1").await.is_empty());
}

#[tokio::test]
async fn test_index_unavailable_is_retried_once_then_terminal() {
    let embedder = Arc::new(UnavailableEmbedder::new());
    let generator = Arc::new(ScriptedGenerator::new(&["never streamed"]));
    let pipeline = pipeline_with_embedder(embedder.clone(), generator.clone(), with_history());

    let events = collect(pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"))).await;

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(events.len(), 1);
    assert_eq!(error_kind(&events), Some("index_unavailable"));
    assert_eq!(generator.stream_calls(), 0);
    assert!(pipeline.sessions().get_history("s1").await.is_empty());
}

#[tokio::test]
async fn test_keyword_timeout_is_retried_once_then_terminal() {
    let generator = Arc::new(
        ScriptedGenerator::new(&["never streamed"]).with_completion_delay(Duration::from_secs(2)),
    );
    let pipeline = pipeline(generator.clone(), with_history());

    let request = AnalysisRequest::new("What should I eat?")
        .with_session("s1")
        .with_strategy(RetrievalStrategy::Keyword);
    let events = collect(pipeline.stream(request)).await;

    assert_eq!(generator.complete_calls(), 2);
    assert_eq!(events.len(), 1);
    assert_eq!(error_kind(&events), Some("retrieval_timeout"));
    assert_eq!(generator.stream_calls(), 0);
}

#[tokio::test]
async fn test_mid_stream_failure_replaces_end() {
    let generator = Arc::new(ScriptedGenerator::new(&["a", "b", "c", "d"]).with_failure_after(2));
    let pipeline = pipeline(generator.clone(), with_history());

    let events = collect(pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"))).await;

    assert_eq!(events.len(), 4);
    assert_eq!(events[0], ResponseEvent::start());
    assert_eq!(chunk_count(&events), 2);
    assert_eq!(error_kind(&events), Some("generation_failed"));
    assert!(!events.iter().any(|e| matches!(e, ResponseEvent::End { .. })));
    // no retry once fragments flowed
    assert_eq!(generator.stream_calls(), 1);
    assert!(pipeline.sessions().get_history("s1").await.is_empty());
}

#[tokio::test]
async fn test_dropping_stream_cancels_without_persisting() {
    let fragments: Vec<String> = (0..20).map(|i| format!("part{} ", i)).collect();
    let fragments: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let generator = Arc::new(
        ScriptedGenerator::new(&fragments).with_fragment_delay(Duration::from_millis(20)),
    );
    let pipeline = pipeline(generator.clone(), with_history());

    let mut events = pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"));
    assert_eq!(events.next().await, Some(ResponseEvent::start()));
    assert!(matches!(events.next().await, Some(ResponseEvent::Chunk { chunk_id: 1, .. })));
    drop(events);

    // the session is released once the request winds down
    let history = tokio::time::timeout(Duration::from_secs(2), pipeline.sessions().get_history("s1"))
        .await
        .unwrap();
    assert!(history.turns.is_empty());
}

#[tokio::test]
async fn test_explicit_cancel_ends_stream_without_error_event() {
    let generator = Arc::new(
        ScriptedGenerator::new(&["one ", "two ", "three ", "four "])
            .with_fragment_delay(Duration::from_millis(30)),
    );
    let pipeline = pipeline(generator.clone(), with_history());

    let mut events = pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"));
    assert_eq!(events.next().await, Some(ResponseEvent::start()));
    events.cancel();

    let mut rest = Vec::new();
    while let Some(event) = events.next().await {
        rest.push(event);
    }
    assert!(rest.iter().all(|e| matches!(e, ResponseEvent::Chunk { .. })));
    assert!(pipeline.sessions().get_history("s1").await.turns.is_empty());
}

#[tokio::test]
async fn test_execute_reports_cancellation() {
    let generator = Arc::new(
        ScriptedGenerator::new(&["slow"]).with_fragment_delay(Duration::from_millis(200)),
    );
    let pipeline = pipeline(generator, with_history());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline
        .execute(AnalysisRequest::new("What should I eat?").with_session("s1"), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
    assert!(pipeline.sessions().get_history("s1").await.is_empty());
}

#[tokio::test]
async fn test_blank_answer_is_not_persisted() {
    let generator = Arc::new(ScriptedGenerator::new(&["<think>nothing to add</think>", "  "]));
    let pipeline = pipeline(generator, with_history());

    let outcome = pipeline
        .execute(
            AnalysisRequest::new("What should I eat?").with_session("s1"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.total_chunks, 2);
    assert_eq!(outcome.persisted_sequence, None);
    assert!(pipeline.sessions().get_history("s1").await.turns.is_empty());
}

#[tokio::test]
async fn test_reasoning_prefix_is_stripped_before_persisting() {
    let generator = Arc::new(ScriptedGenerator::new(&["<think>salt matters</think>", "\nLimit salt."]));
    let pipeline = pipeline(generator, with_history());

    collect(pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"))).await;

    let history = pipeline.sessions().get_history("s1").await;
    assert_eq!(history.turns[0].answer, "Limit salt.");
}

#[tokio::test]
async fn test_patient_data_reaches_prompt_and_turn() {
    let generator = Arc::new(ScriptedGenerator::new(&["Your pressure is high."]));
    let pipeline = pipeline(generator.clone(), with_history());

    let request = AnalysisRequest::new("What should I eat?")
        .with_session("s1")
        .with_patient_data(json!({ "systolic": { "value": 141, "unit": "mmHg" } }));
    collect(pipeline.stream(request)).await;

    let prompt = &generator.stream_requests()[0].user;
    assert!(prompt.contains("<patient_data>"));
    assert!(prompt.contains("141.00 mmHg"));

    let history = pipeline.sessions().get_history("s1").await;
    let patient = history.turns[0].patient_data.as_deref().unwrap();
    assert!(patient.contains("141.00"));
}

#[tokio::test]
async fn test_keyword_strategy_end_to_end() {
    let generator = Arc::new(
        ScriptedGenerator::new(&["Eat vegetables."])
            .with_completion(Ok("- Hypertension diet recommendation: Eat more vegetables".to_string())),
    );
    let pipeline = pipeline(generator.clone(), with_history());

    let outcome = pipeline
        .execute(
            AnalysisRequest::new("What should I eat?")
                .with_session("s1")
                .with_strategy(RetrievalStrategy::Keyword),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.retrieval.strategy_used, RetrievalStrategy::Keyword);
    assert!(outcome.retrieval.knowledge_base_hit);
    assert!(generator.stream_requests()[0]
        .user
        .contains("1. Hypertension diet recommendation: Eat more vegetables"));
}

#[tokio::test]
async fn test_same_session_requests_do_not_interleave() {
    let generator = Arc::new(
        ScriptedGenerator::new(&["first ", "second ", "third"]).with_fragment_delay(Duration::from_millis(10)),
    );
    let pipeline = pipeline(generator, with_history());

    let a = pipeline.stream(AnalysisRequest::new("What should I eat?").with_session("s1"));
    let b = pipeline.stream(AnalysisRequest::new("What else should I eat?").with_session("s1"));
    let (a, b) = tokio::join!(collect(a), collect(b));

    assert_eq!(a.last(), Some(&ResponseEvent::end(3)));
    assert_eq!(b.last(), Some(&ResponseEvent::end(3)));

    let history = pipeline.sessions().get_history("s1").await;
    let sequences: Vec<u64> = history.turns.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert!(history.turns.iter().all(|t| t.answer == "first second third"));
}

#[tokio::test]
async fn test_retrieve_only_leaves_sessions_untouched() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let pipeline = pipeline(generator.clone(), with_history());

    let result = pipeline
        .retrieve_only(&AnalysisRequest::new("What should I eat?").with_session("s1"))
        .await
        .unwrap();

    assert!(result.hit);
    assert!(result.passages[0].text.contains("diet recommendation"));
    assert!(pipeline.sessions().is_empty());
    assert_eq!(generator.stream_calls(), 0);
}
