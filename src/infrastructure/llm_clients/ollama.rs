use super::{endpoint, LLMClient};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama `/api/generate`, non-streaming.
pub struct OllamaClient {
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn payload(config: &LLMConfig, prompt: &str) -> serde_json::Value {
        json!({
            "model": config.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": config.temperature,
                "top_p": config.top_p,
                "num_predict": config.max_tokens,
                "stop": config.stop,
            }
        })
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(&self, config: &LLMConfig, prompt: &str) -> Result<String> {
        let url = endpoint(&config.base_url, "api/generate");
        debug!(url = %url, model = %config.model, "Calling Ollama");

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&Self::payload(config, prompt))
            .send()
            .await
            .map_err(|e| {
                AppError::ServiceUnavailable(format!(
                    "Could not connect to Ollama at {}: {}",
                    url, e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ServiceUnavailable(format!(
                "Ollama API returned status {}: {}",
                status, text
            )));
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(body.response.trim().to_string())
    }
}
