//! Knowledge corpus model and passage extraction
//!
//! A corpus is flattened into passages in a fixed order. That order is the
//! tie-breaker for equal similarity scores, so extraction must stay
//! deterministic.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A clinical guideline document for one condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub condition: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub diagnosis: Vec<String>,
    /// Topic name and recommendations (e.g. "diet", "exercise"), in document order
    #[serde(default, with = "ordered_topics")]
    pub recommendations: Vec<(String, Vec<String>)>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub complications: Vec<String>,
    #[serde(default)]
    pub domestic: Vec<String>,
    #[serde(default)]
    pub ethnic: Vec<String>,
}

/// Wrapper accepted for multi-condition corpora
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuidelineSet {
    pub medical_guidelines: Vec<Guideline>,
}

/// Knowledge base supplied with a request or configured as the default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnowledgeBase {
    /// Plain passages, used verbatim
    Passages(Vec<String>),
    /// Several guideline documents
    Guidelines(Vec<Guideline>),
    /// `{"medical_guidelines": [...]}`
    GuidelineSet(GuidelineSet),
    /// One guideline document
    Guideline(Guideline),
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        KnowledgeBase::Passages(Vec::new())
    }
}

/// Passage origin within a structured corpus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub condition: Option<String>,
    pub topic: Option<String>,
}

/// A retrievable unit of knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePassage {
    /// Position in corpus order
    pub index: usize,
    pub text: String,
    pub metadata: PassageMetadata,
}

impl KnowledgeBase {
    /// Flatten the corpus into passages, in corpus order, skipping blanks
    pub fn passages(&self) -> Vec<KnowledgePassage> {
        let mut raw: Vec<(String, PassageMetadata)> = Vec::new();

        match self {
            KnowledgeBase::Passages(texts) => {
                for text in texts {
                    raw.push((text.trim().to_string(), PassageMetadata::default()));
                }
            }
            KnowledgeBase::Guidelines(guidelines) => {
                for guideline in guidelines {
                    extract_guideline(guideline, &mut raw);
                }
            }
            KnowledgeBase::GuidelineSet(set) => {
                for guideline in &set.medical_guidelines {
                    extract_guideline(guideline, &mut raw);
                }
            }
            KnowledgeBase::Guideline(guideline) => extract_guideline(guideline, &mut raw),
        }

        raw.into_iter()
            .filter(|(text, _)| !text.is_empty())
            .enumerate()
            .map(|(index, (text, metadata))| KnowledgePassage {
                index,
                text,
                metadata,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passages().is_empty()
    }
}

fn extract_guideline(guideline: &Guideline, out: &mut Vec<(String, PassageMetadata)>) {
    let condition = guideline.condition.trim();
    let meta = |topic: &str| PassageMetadata {
        condition: Some(condition.to_string()),
        topic: Some(topic.to_string()),
    };

    if let Some(description) = guideline.description.as_deref() {
        if !description.trim().is_empty() {
            out.push((
                format!("{} disease description: {}", condition, description.trim()),
                meta("description"),
            ));
        }
    }

    push_all(out, &guideline.symptoms, |s| format!("{} symptom: {}", condition, s), || meta("symptoms"));
    push_all(out, &guideline.diagnosis, |s| format!("{} diagnosis: {}", condition, s), || meta("diagnosis"));

    for (topic, suggestions) in &guideline.recommendations {
        push_all(
            out,
            suggestions,
            |s| format!("{} {} recommendation: {}", condition, topic, s),
            || meta(topic.as_str()),
        );
    }

    push_all(out, &guideline.risk_factors, |s| format!("{} risk factor: {}", condition, s), || meta("risk_factors"));
    push_all(out, &guideline.complications, |s| format!("{} complication: {}", condition, s), || meta("complications"));
    push_all(out, &guideline.domestic, |s| format!("{} domestic data: {}", condition, s), || meta("domestic_context"));
    push_all(out, &guideline.ethnic, |s| format!("{} ethnic data: {}", condition, s), || meta("ethnic_context"));
}

/// A JSON object of topics read as a list, so document order survives
mod ordered_topics {
    use super::*;

    pub fn serialize<S>(topics: &[(String, Vec<String>)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(topics.len()))?;
        for (topic, items) in topics {
            map.serialize_entry(topic, items)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<String>)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(TopicsVisitor)
    }

    struct TopicsVisitor;

    impl<'de> Visitor<'de> for TopicsVisitor {
        type Value = Vec<(String, Vec<String>)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of topic names to recommendation lists")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut topics: Vec<(String, Vec<String>)> = Vec::new();
            while let Some((topic, items)) = access.next_entry::<String, Vec<String>>()? {
                // a repeated key replaces the earlier list in place
                match topics.iter_mut().find(|(t, _)| *t == topic) {
                    Some(existing) => existing.1 = items,
                    None => topics.push((topic, items)),
                }
            }
            Ok(topics)
        }
    }
}

fn push_all<F, M>(out: &mut Vec<(String, PassageMetadata)>, items: &[String], render: F, meta: M)
where
    F: Fn(&str) -> String,
    M: Fn() -> PassageMetadata,
{
    for item in items {
        let item = item.trim();
        if !item.is_empty() {
            out.push((render(item), meta()));
        }
    }
}
