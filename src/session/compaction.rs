//! Condensing a batch of turns into one summary
//!
//! Summaries are produced by the generation capability. When it fails the
//! store either keeps the turns (best effort) or, if the turn bound is at
//! stake, falls back to [`Compactor::extractive`].

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::config::LlmConfig;
use crate::errors::{RagError, Result};
use crate::generation::prompts::{
    build_summary_prompt, CONCLUSION_TAG, HEALTH_TAG, INTENT_TAG, SUMMARY_SYSTEM_PROMPT,
};
use crate::generation::{GenerationRequest, Generator};
use crate::types::{strip_reasoning, Summary, SummarySource, Turn, TurnRange};

/// Characters of each answer kept in an extractive summary
const EXTRACT_ANSWER_CHARS: usize = 160;

#[derive(Clone)]
pub struct Compactor {
    generator: Arc<dyn Generator>,
    max_tokens: u32,
    temperature: f32,
}

impl Compactor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            max_tokens: 1000,
            temperature: 0.3,
        }
    }

    pub fn from_config(generator: Arc<dyn Generator>, config: &LlmConfig) -> Self {
        Self {
            generator,
            max_tokens: config.summary_max_tokens,
            temperature: config.summary_temperature,
        }
    }

    /// Ask the model for a structured summary of `turns`
    pub async fn summarize(&self, turns: &[Turn]) -> Result<Summary> {
        let range = covered_range(turns)?;
        let request = GenerationRequest::new(SUMMARY_SYSTEM_PROMPT, build_summary_prompt(turns))
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);

        let text = self
            .generator
            .complete(request)
            .await
            .map_err(|e| RagError::Summarization(e.to_string()))?;

        let summary = parse_summary(&text, range)?;
        debug!(first = range.first, last = range.last, "summary generated");
        Ok(summary)
    }

    /// Local summary built from the turns themselves
    pub fn extractive(turns: &[Turn]) -> Summary {
        let range = covered_range(turns).unwrap_or(TurnRange { first: 0, last: 0 });
        let user_intent = turns
            .iter()
            .map(|t| format!("- {}", t.question.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        let response_conclusion = turns
            .iter()
            .map(|t| format!("- {}", truncate(t.answer.trim(), EXTRACT_ANSWER_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");

        Summary {
            covered_turn_range: range,
            user_intent,
            health_changes: String::new(),
            response_conclusion,
            source: SummarySource::Extractive,
            created_at: Utc::now(),
        }
    }
}

fn covered_range(turns: &[Turn]) -> Result<TurnRange> {
    match (turns.first(), turns.last()) {
        (Some(first), Some(last)) => Ok(TurnRange {
            first: first.sequence,
            last: last.sequence,
        }),
        _ => Err(RagError::Summarization("no turns to summarise".to_string())),
    }
}

/// Split model output into the three tagged sections
///
/// Output without any recognised tag is kept whole as the conclusion.
pub fn parse_summary(text: &str, range: TurnRange) -> Result<Summary> {
    let text = strip_reasoning(text);
    if text.is_empty() {
        return Err(RagError::Summarization("model returned an empty summary".to_string()));
    }

    let intent = extract_tag(&text, INTENT_TAG);
    let health = extract_tag(&text, HEALTH_TAG);
    let conclusion = extract_tag(&text, CONCLUSION_TAG);

    let (user_intent, health_changes, response_conclusion) =
        if intent.is_none() && health.is_none() && conclusion.is_none() {
            (String::new(), String::new(), text)
        } else {
            (
                intent.unwrap_or_default(),
                health.unwrap_or_default(),
                conclusion.unwrap_or_default(),
            )
        };

    Ok(Summary {
        covered_turn_range: range,
        user_intent,
        health_changes,
        response_conclusion,
        source: SummarySource::Generated,
        created_at: Utc::now(),
    })
}

fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..]
        .find(&close)
        .map(|offset| start + offset)
        .unwrap_or(text.len());
    Some(text[start..end].trim().to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
