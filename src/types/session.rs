//! Conversation records owned by a session
//!
//! Turns and summaries are immutable once the session store has accepted
//! them; the store hands out clones, never references into its state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::request::RetrievalStrategy;

/// How a turn's supporting context was obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    pub strategy_used: RetrievalStrategy,
    pub knowledge_base_hit: bool,
}

/// One question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Per-session ordinal, assigned by the store on append (starts at 1)
    pub sequence: u64,
    pub question: String,
    pub answer: String,
    /// Formatted patient data that accompanied the question
    pub patient_data: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub retrieval_metadata: RetrievalMetadata,
}

impl Turn {
    /// Create an unsequenced turn; the reasoning prefix of `answer` is dropped
    pub fn new(
        question: impl Into<String>,
        answer: impl AsRef<str>,
        patient_data: Option<String>,
        retrieval_metadata: RetrievalMetadata,
    ) -> Self {
        Self {
            sequence: 0,
            question: question.into(),
            answer: strip_reasoning(answer.as_ref()),
            patient_data,
            timestamp: Utc::now(),
            retrieval_metadata,
        }
    }
}

/// Inclusive range of turn sequences condensed into one summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRange {
    pub first: u64,
    pub last: u64,
}

impl TurnRange {
    /// Number of turns covered
    pub fn len(&self) -> u64 {
        self.last.saturating_sub(self.first) + 1
    }
}

/// Where a summary's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// Written by the generation capability
    Generated,
    /// Assembled locally when generation failed and the turn bound had to hold
    Extractive,
}

/// Condensed record replacing a batch of raw turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub covered_turn_range: TurnRange,
    pub user_intent: String,
    pub health_changes: String,
    pub response_conclusion: String,
    pub source: SummarySource,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    /// Render the summary as prompt text
    pub fn render(&self) -> String {
        let mut text = format!(
            "Turns {}-{}\n",
            self.covered_turn_range.first, self.covered_turn_range.last
        );
        if !self.user_intent.is_empty() {
            text.push_str(&format!("User intent:\n{}\n", self.user_intent));
        }
        if !self.health_changes.is_empty() {
            text.push_str(&format!("Health status changes:\n{}\n", self.health_changes));
        }
        if !self.response_conclusion.is_empty() {
            text.push_str(&format!("Response conclusions:\n{}\n", self.response_conclusion));
        }
        text
    }
}

/// Point-in-time copy of a session's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Active (not yet summarized) turns, oldest first
    pub turns: Vec<Turn>,
    /// Accumulated summaries, oldest first
    pub summaries: Vec<Summary>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.summaries.is_empty()
    }
}

/// Drop a leading reasoning trace (everything up to the last `</think>`)
pub fn strip_reasoning(text: &str) -> String {
    match text.rfind("</think>") {
        Some(pos) => text[pos + "</think>".len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RetrievalMetadata {
        RetrievalMetadata {
            strategy_used: RetrievalStrategy::Vector,
            knowledge_base_hit: true,
        }
    }

    #[test]
    fn test_strip_reasoning() {
        assert_eq!(strip_reasoning("<think>hmm</think>\n Answer"), "Answer");
        assert_eq!(strip_reasoning("  plain answer "), "plain answer");
        assert_eq!(strip_reasoning("a</think>b</think> c"), "c");
    }

    #[test]
    fn test_turn_new_strips_reasoning() {
        let turn = Turn::new("q", "<think>x</think>final", None, metadata());
        assert_eq!(turn.answer, "final");
        assert_eq!(turn.sequence, 0);
    }

    #[test]
    fn test_turn_range_len() {
        let range = TurnRange { first: 6, last: 10 };
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn test_summary_render_skips_empty_sections() {
        let summary = Summary {
            covered_turn_range: TurnRange { first: 1, last: 5 },
            user_intent: "- asks about diet".to_string(),
            health_changes: String::new(),
            response_conclusion: "- reduce salt".to_string(),
            source: SummarySource::Generated,
            created_at: Utc::now(),
        };
        let text = summary.render();
        assert!(text.starts_with("Turns 1-5"));
        assert!(text.contains("asks about diet"));
        assert!(!text.contains("Health status changes"));
    }
}
