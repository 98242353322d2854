//! System prompts and prompt builders shared by retrieval and compaction

use crate::knowledge::KnowledgePassage;
use crate::types::Turn;

/// Exact reply requested from the model when keyword retrieval finds nothing
pub const NO_MATCH_SENTINEL: &str = "No relevant content retrieved.";

/// Sentinel emitted by older deployments that answered in Chinese
pub const LEGACY_NO_MATCH_SENTINEL: &str = "沒有檢索到相關內容";

pub const INTENT_TAG: &str = "UserIntentSummary";
pub const HEALTH_TAG: &str = "HealthStatusChanges";
pub const CONCLUSION_TAG: &str = "SystemResponseConclusions";

pub const RETRIEVAL_SYSTEM_PROMPT: &str = "\
### ROLE ###
You select medical reference material.
Copy out only the knowledge base entries that bear directly on the user's question.

### RULES ###
1. Quote entries verbatim. Never explain, summarise or reword them.
2. Put every entry on its own line starting with \"- \".
3. If no entry is relevant, reply exactly: No relevant content retrieved.
4. Answer in English.
";

pub const ENHANCEMENT_SYSTEM_PROMPT: &str = "\
### ROLE ###
You are a clinical informatics analyst answering questions about one patient.
Every statement must be supported by the material in the prompt.

### RULES ###
1. Use only <retrieved_knowledge>, <conversation_history>, <patient_data> and <user_question>.
2. Incorporate relevant retrieved knowledge into the answer.
3. Prefer patient data for patient-specific facts and retrieved knowledge for general guidance.
4. If the material is insufficient, reply exactly: I cannot answer based on the available data.
5. Do not show reasoning steps. Answer in English.

### OUTPUT FORMAT ###
Answer: <direct answer, at most seven sentences>
Context: <one or two sentences naming the supporting data>
";

pub const BASE_SYSTEM_PROMPT: &str = "\
### ROLE ###
You are a medical assistant analysing structured patient data.

### RULES ###
1. Use only <conversation_history>, <patient_data> and <user_question>.
2. If the material is insufficient, reply exactly: I cannot answer based on the available data.
3. Stay factual. Do not speculate or prescribe. Answer in English.

### OUTPUT FORMAT ###
Answer: <concise factual statement>
Context: <optional one or two sentence explanation>
";

pub const SUMMARY_SYSTEM_PROMPT: &str = "\
### ROLE ###
You condense clinical conversations for later reference.

### RULES ###
1. Use only facts present in the conversation records.
2. Keep each section to at most three short bullet points.
3. Answer in English.
";

/// Keyword retrieval prompt over the raw corpus text
pub fn build_retrieval_prompt(question: &str, passages: &[KnowledgePassage]) -> String {
    let corpus = passages
        .iter()
        .map(|p| format!("- {}", p.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<user_question>\n{}\n</user_question>\n\n<knowledge_base>\n{}\n</knowledge_base>\n\n\
         List every knowledge base entry directly relevant to the question, one per line \
         starting with \"- \". If none is relevant, reply exactly: {}",
        question.trim(),
        corpus,
        NO_MATCH_SENTINEL
    )
}

/// Summary prompt over a batch of turns
pub fn build_summary_prompt(turns: &[Turn]) -> String {
    let mut records = String::new();
    for turn in turns {
        records.push_str(&format!(
            "<conversation_turn>\n<turn_number>{}</turn_number>\n<question>{}</question>\n",
            turn.sequence,
            turn.question.trim()
        ));
        if let Some(data) = turn.patient_data.as_deref() {
            records.push_str(&format!("<patient_data>{}</patient_data>\n", data.trim()));
        }
        records.push_str(&format!(
            "<answer>{}</answer>\n</conversation_turn>\n",
            turn.answer.trim()
        ));
    }

    format!(
        "<conversation_records>\n{records}</conversation_records>\n\n\
         Summarise the conversation into three sections:\n\
         1. the user's main intent and needs\n\
         2. changes in health status visible in the patient data\n\
         3. the key conclusions of the answers\n\n\
         Use exactly this layout:\n\
         <{intent}>\n- ...\n</{intent}>\n\
         <{health}>\n- ...\n</{health}>\n\
         <{conclusion}>\n- ...\n</{conclusion}>\n",
        records = records,
        intent = INTENT_TAG,
        health = HEALTH_TAG,
        conclusion = CONCLUSION_TAG,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::PassageMetadata;
    use crate::types::RetrievalMetadata;

    #[test]
    fn test_retrieval_prompt_lists_passages() {
        let passages = vec![
            KnowledgePassage {
                index: 0,
                text: "Hypertension symptom: Headache".to_string(),
                metadata: PassageMetadata::default(),
            },
            KnowledgePassage {
                index: 1,
                text: "Diabetes symptom: Thirst".to_string(),
                metadata: PassageMetadata::default(),
            },
        ];
        let prompt = build_retrieval_prompt("  headaches? ", &passages);
        assert!(prompt.contains("<user_question>\nheadaches?\n</user_question>"));
        assert!(prompt.contains("- Hypertension symptom: Headache\n- Diabetes symptom: Thirst"));
        assert!(prompt.ends_with(NO_MATCH_SENTINEL));
    }

    #[test]
    fn test_summary_prompt_includes_turns_and_tags() {
        let mut turn = Turn::new("q1", "a1", Some("bp: 120.00".to_string()), RetrievalMetadata::default());
        turn.sequence = 3;
        let prompt = build_summary_prompt(&[turn]);
        assert!(prompt.contains("<turn_number>3</turn_number>"));
        assert!(prompt.contains("<question>q1</question>"));
        assert!(prompt.contains("<patient_data>bp: 120.00</patient_data>"));
        assert!(prompt.contains("<UserIntentSummary>"));
        assert!(prompt.contains("</SystemResponseConclusions>"));
    }
}
