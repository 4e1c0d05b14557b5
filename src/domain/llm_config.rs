use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    /// Ollama `/api/generate`
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    OpenAI,
}

/// Settings for the SQL generation service. Decoding defaults favour determinism.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    #[validate(range(min = 1, max = 8192))]
    pub max_tokens: u32,
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub top_p: f32,
    pub stop: Vec<String>,
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "sqlcoder".to_string(),
            api_key: None,
            max_tokens: 256,
            temperature: 0.0,
            top_p: 0.9,
            stop: vec![
                "\n\n".to_string(),
                "###".to_string(),
                "Explanation:".to_string(),
                "Here's".to_string(),
                "The query".to_string(),
            ],
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// In-process fastembed model
    Local,
    Ollama,
    OpenAI,
    /// No backend; retrieval runs on lexical overlap only
    Disabled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            base_url: "http://localhost:11434".to_string(),
            model: "all-minilm-l6-v2".to_string(),
            api_key: None,
        }
    }
}
