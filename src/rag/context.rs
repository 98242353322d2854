//! Context composer: pure assembly of the prompt handed to generation
//!
//! Section order is fixed: retrieved knowledge, conversation history,
//! patient data, question. Which of the first two appear depends on the
//! response mode.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::generation::prompts::{BASE_SYSTEM_PROMPT, ENHANCEMENT_SYSTEM_PROMPT};
use crate::generation::GenerationRequest;
use crate::patient::PatientRecord;
use crate::rag::retrieval::RetrievalResult;
use crate::types::SessionSnapshot;

/// Composer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// Estimated token budget for retrieved passages
    pub max_passage_tokens: usize,
    /// Raw turns shown after the summaries
    pub recent_turns: usize,
    /// Past answers longer than this are cut and marked with `...`
    pub answer_preview_chars: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_passage_tokens: 2000,
            recent_turns: 5,
            answer_preview_chars: 200,
        }
    }
}

impl From<&Config> for ComposerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_passage_tokens: config.prompt.max_passage_tokens,
            recent_turns: config.session.recent_turns_in_prompt,
            answer_preview_chars: config.prompt.answer_preview_chars,
        }
    }
}

/// Selected by `(history_enabled, hit)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMode {
    /// Passages, then history
    RetrievalWithHistory,
    /// History only
    HistoryOnly,
    /// Passages only
    RetrievalOnly,
    /// Neither
    QuestionOnly,
}

impl ResponseMode {
    pub fn select(history_enabled: bool, hit: bool) -> Self {
        match (history_enabled, hit) {
            (true, true) => ResponseMode::RetrievalWithHistory,
            (true, false) => ResponseMode::HistoryOnly,
            (false, true) => ResponseMode::RetrievalOnly,
            (false, false) => ResponseMode::QuestionOnly,
        }
    }

    pub fn includes_passages(&self) -> bool {
        matches!(self, ResponseMode::RetrievalWithHistory | ResponseMode::RetrievalOnly)
    }

    pub fn includes_history(&self) -> bool {
        matches!(self, ResponseMode::RetrievalWithHistory | ResponseMode::HistoryOnly)
    }
}

/// Bounded prompt ready for generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedPrompt {
    pub mode: ResponseMode,
    pub system: String,
    pub text: String,
    pub passage_count: usize,
    pub estimated_tokens: usize,
}

impl ComposedPrompt {
    pub fn to_request(&self, max_tokens: u32, temperature: f32) -> GenerationRequest {
        GenerationRequest::new(self.system.clone(), self.text.clone())
            .with_max_tokens(max_tokens)
            .with_temperature(temperature)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextComposer {
    config: ComposerConfig,
}

impl ContextComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ComposerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Assemble the prompt; never calls out
    pub fn compose(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        history: &SessionSnapshot,
        patient: Option<&PatientRecord>,
        history_enabled: bool,
    ) -> ComposedPrompt {
        let mode = ResponseMode::select(history_enabled, retrieval.hit);
        let mut sections = Vec::new();
        let mut passage_count = 0;

        if mode.includes_passages() {
            let (block, count) = self.passage_block(retrieval);
            passage_count = count;
            if count > 0 {
                sections.push(block);
            }
        }

        if mode.includes_history() {
            if let Some(block) = self.history_block(history) {
                sections.push(block);
            }
        }

        if let Some(record) = patient {
            sections.push(format!("<patient_data>\n{}\n</patient_data>", record.render()));
        }

        sections.push(format!("<user_question>\n{}\n</user_question>", question.trim()));

        let text = sections.join("\n\n");
        let system = if passage_count > 0 {
            ENHANCEMENT_SYSTEM_PROMPT
        } else {
            BASE_SYSTEM_PROMPT
        };

        ComposedPrompt {
            mode,
            system: system.to_string(),
            estimated_tokens: estimate_tokens(system) + estimate_tokens(&text),
            text,
            passage_count,
        }
    }

    /// Passages in rank order until the budget is spent; the first always fits
    fn passage_block(&self, retrieval: &RetrievalResult) -> (String, usize) {
        let mut lines = Vec::new();
        let mut total_tokens = 0;

        for passage in &retrieval.passages {
            let tokens = estimate_tokens(&passage.text);
            if !lines.is_empty() && total_tokens + tokens > self.config.max_passage_tokens {
                break;
            }
            lines.push(format!("{}. {}", lines.len() + 1, passage.text.trim()));
            total_tokens += tokens;
        }

        let count = lines.len();
        (
            format!("<retrieved_knowledge>\n{}\n</retrieved_knowledge>", lines.join("\n")),
            count,
        )
    }

    /// All summaries, then the most recent raw turns, oldest first
    fn history_block(&self, history: &SessionSnapshot) -> Option<String> {
        let mut parts: Vec<String> = history
            .summaries
            .iter()
            .map(|summary| format!("[Summary] {}", summary.render().trim_end()))
            .collect();

        let skip = history.turns.len().saturating_sub(self.config.recent_turns);
        for turn in &history.turns[skip..] {
            let mut block = format!("[Turn {}]\nQuestion: {}", turn.sequence, turn.question.trim());
            if let Some(patient) = turn.patient_data.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                block.push_str(&format!("\nPatient data:\n{}", patient));
            }
            block.push_str(&format!(
                "\nAnswer: {}",
                preview(turn.answer.trim(), self.config.answer_preview_chars)
            ));
            parts.push(block);
        }

        if parts.is_empty() {
            return None;
        }
        Some(format!(
            "<conversation_history>\n{}\n</conversation_history>",
            parts.join("\n\n")
        ))
    }
}

fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Rough estimate: ~4 chars per token
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}
