use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{EmbeddingConfig, EmbeddingProvider};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Turns texts into fixed-dimension dense vectors in one shared space.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ServiceUnavailable("Empty embedding response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
    local_embedder: Arc<Mutex<Option<TextEmbedding>>>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            local_embedder: Arc::new(Mutex::new(None)),
        }
    }

    fn resolve_local_embedding_model(model: &str) -> EmbeddingModel {
        match model.trim().to_lowercase().as_str() {
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "all-minilm-l12-v2" => EmbeddingModel::AllMiniLML12V2,
            _ => EmbeddingModel::AllMiniLML6V2,
        }
    }

    async fn embed_local(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Self::resolve_local_embedding_model(&self.config.model);
        let embedder = Arc::clone(&self.local_embedder);
        let texts = texts.to_vec();

        // fastembed runs the model synchronously
        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = embedder.lock().map_err(|_| {
                AppError::ServiceUnavailable("Local embedder lock poisoned".to_string())
            })?;
            if guard.is_none() {
                let mut options = InitOptions::default();
                options.model_name = model;
                let created = TextEmbedding::try_new(options).map_err(|e| {
                    AppError::ServiceUnavailable(format!("Failed to init local embedder: {}", e))
                })?;
                *guard = Some(created);
            }
            let embedder = guard.as_mut().ok_or_else(|| {
                AppError::ServiceUnavailable("Local embedder unavailable".to_string())
            })?;
            embedder
                .embed(texts, None)
                .map_err(|e| AppError::ServiceUnavailable(format!("Failed to embed text: {}", e)))
        })
        .await
        .map_err(|e| AppError::ServiceUnavailable(format!("Embedding task failed: {}", e)))?
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = if self.config.base_url.ends_with('/') {
            format!("{}embeddings", self.config.base_url)
        } else {
            format!("{}/embeddings", self.config.base_url)
        };

        let request = OpenAIEmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let mut req = self.client.post(&url);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::ServiceUnavailable(format!(
                    "Failed to call embedding API ({}): {}",
                    url, e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ServiceUnavailable(format!(
                "Embedding API returned error {} (URL: {}): {}",
                status, url, error_text
            )));
        }

        let mut embedding_response: OpenAIEmbeddingResponse =
            response.json().await.map_err(|e| {
                AppError::ParseError(format!("Failed to parse embedding response: {}", e))
            })?;
        embedding_response.data.sort_by_key(|d| d.index);

        Ok(embedding_response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .collect())
    }

    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base = self
            .config
            .base_url
            .trim_end_matches('/')
            .trim_end_matches("/v1")
            .trim_end_matches('/');
        let url = format!("{}/api/embeddings", base);

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let request = OllamaEmbeddingRequest {
                model: &self.config.model,
                prompt: text,
            };

            let response = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    AppError::ServiceUnavailable(format!(
                        "Failed to call embedding API ({}): {}",
                        url, e
                    ))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppError::ServiceUnavailable(format!(
                    "Embedding API returned error {} (URL: {}): {}",
                    status, url, error_text
                )));
            }

            let embedding_response: OllamaEmbeddingResponse =
                response.json().await.map_err(|e| {
                    AppError::ParseError(format!("Failed to parse embedding response: {}", e))
                })?;
            embeddings.push(embedding_response.embedding);
        }
        Ok(embeddings)
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot_product / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = ?self.config.provider,
            count = texts.len(),
            "Embedding texts"
        );
        let embeddings = match self.config.provider {
            EmbeddingProvider::Local => self.embed_local(texts).await?,
            EmbeddingProvider::OpenAI => self.embed_openai(texts).await?,
            EmbeddingProvider::Ollama => self.embed_ollama(texts).await?,
            EmbeddingProvider::Disabled => {
                return Err(AppError::ServiceUnavailable(
                    "Embedding backend is disabled".to_string(),
                ))
            }
        };

        if embeddings.len() != texts.len() || embeddings.iter().any(|e| e.is_empty()) {
            return Err(AppError::ServiceUnavailable(format!(
                "Embedding backend returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }
}
