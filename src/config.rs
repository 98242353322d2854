//! Configuration management for medstream
//!
//! Provides TOML-based configuration with defaults, environment overrides and
//! validation.
//! Location: ~/.medstream/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::embedding::DEFAULT_MODEL_ID;
use crate::errors::{RagError, Result};
use crate::generation::client::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub session: SessionConfig,
    pub prompt: PromptConfig,
    pub patient: PatientConfig,
    pub paths: PathsConfig,
}

/// Generation backend connection and sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub answer_temperature: f32,
    pub retrieval_temperature: f32,
    pub summary_temperature: f32,
    pub summary_max_tokens: u32,
    pub request_timeout_secs: u64,
}

/// Retrieval tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum cosine similarity for a passage to count as relevant
    pub threshold: f32,
    /// Keyword retrieval deadline
    pub timeout_secs: u64,
    /// Prepended to the question before embedding (some models expect "query: ")
    pub query_prefix: Option<String>,
    /// Attempts for retryable retrieval failures
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Bert,
    Lexical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model_id: String,
}

/// Conversation memory behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub history_enabled: bool,
    pub require_retrieval: bool,
    pub compaction_batch: usize,
    pub max_active_turns: usize,
    pub recent_turns_in_prompt: usize,
}

/// Prompt size limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Token budget for retrieved passages (estimated)
    pub max_passage_tokens: usize,
    /// Past answers in the history block are cut to this many characters
    pub answer_preview_chars: usize,
}

/// How `structured_patient_data` is read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// FHIR for bundles, flattening otherwise
    #[default]
    Auto,
    Flat,
    Fhir,
}

impl std::str::FromStr for RecordFormat {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RecordFormat::Auto),
            "flat" => Ok(RecordFormat::Flat),
            "fhir" => Ok(RecordFormat::Fhir),
            other => Err(RagError::Config(format!("Unknown patient record format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientConfig {
    pub format: RecordFormat,
}

/// File system paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Corpus used when a request carries none
    pub knowledge_base: Option<String>,
    /// REPL line history
    pub history_file: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: Some("OPENROUTER_API_KEY".to_string()),
            max_tokens: 2000,
            answer_temperature: 0.3,
            retrieval_temperature: 0.1,
            summary_temperature: 0.3,
            summary_max_tokens: 1000,
            request_timeout_secs: 300,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            timeout_secs: 60,
            query_prefix: None,
            max_attempts: 2,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Bert,
            model_id: DEFAULT_MODEL_ID.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_enabled: true,
            require_retrieval: false,
            compaction_batch: 5,
            max_active_turns: 10,
            recent_turns_in_prompt: 5,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_passage_tokens: 2000,
            answer_preview_chars: 200,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            knowledge_base: None,
            history_file: "~/.medstream/history".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults, then apply environment overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(config_path) => Self::load_from_file(&config_path)?,
            None => Self::load_default()?,
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RagError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| RagError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load from the standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".medstream").join("config.toml"))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("LLM_DEFAULT_MODEL") {
            self.llm.model = model;
        }
        if let Some(value) = lookup("LLM_DEFAULT_MAX_TOKENS") {
            self.llm.max_tokens = parse_var("LLM_DEFAULT_MAX_TOKENS", &value)?;
        }
        if let Some(value) = lookup("LLM_RETRIEVAL_TEMPERATURE") {
            self.llm.retrieval_temperature = parse_var("LLM_RETRIEVAL_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("LLM_ENHANCEMENT_TEMPERATURE") {
            self.llm.answer_temperature = parse_var("LLM_ENHANCEMENT_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("VECTOR_SEARCH_TOP_K") {
            self.retrieval.top_k = parse_var("VECTOR_SEARCH_TOP_K", &value)?;
        }
        if let Some(value) = lookup("MEDSTREAM_REQUIRE_RETRIEVAL") {
            self.session.require_retrieval = parse_flag("MEDSTREAM_REQUIRE_RETRIEVAL", &value)?;
        }
        if let Some(value) = lookup("MEDSTREAM_HISTORY_ENABLED") {
            self.session.history_enabled = parse_flag("MEDSTREAM_HISTORY_ENABLED", &value)?;
        }
        if let Some(value) = lookup("MEDSTREAM_PATIENT_FORMAT") {
            self.patient.format = value.parse()?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than 0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.retrieval.threshold) {
            return Err(RagError::Config(
                "threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.retrieval.max_attempts == 0 {
            return Err(RagError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let batch = self.session.compaction_batch;
        if batch == 0 {
            return Err(RagError::Config(
                "compaction_batch must be greater than 0".to_string(),
            ));
        }

        if self.session.max_active_turns < batch || self.session.max_active_turns % batch != 0 {
            return Err(RagError::Config(format!(
                "max_active_turns ({}) must be a positive multiple of compaction_batch ({})",
                self.session.max_active_turns, batch
            )));
        }

        for (name, value) in [
            ("answer_temperature", self.llm.answer_temperature),
            ("retrieval_temperature", self.llm.retrieval_temperature),
            ("summary_temperature", self.llm.summary_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(RagError::Config(format!(
                    "{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RagError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| RagError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn history_file(&self) -> PathBuf {
        Self::expand_path(&self.paths.history_file)
    }

    pub fn knowledge_base_path(&self) -> Option<PathBuf> {
        self.paths.knowledge_base.as_deref().map(Self::expand_path)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RagError::Config(format!("Invalid value for {}: {}", name, value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::Config(format!("Invalid value for {}: {}", name, value))),
    }
}
