//! Ollama embedding provider.
//!
//! Calls `/api/embeddings` one text at a time. Embedding requests are
//! idempotent, so network failures, 5xx and 429 responses are all retried
//! under the shared [`RetryPolicy`].

use crate::embeddings::EmbeddingProvider;
use lumen_core::config::EmbeddingSettings;
use lumen_core::{AppError, AppResult};
use lumen_llm::{CallError, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    /// Build the provider. No request is made until the first `embed`.
    pub fn new(settings: &EmbeddingSettings, retry: RetryPolicy) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(retry.request_timeout)
            .build()
            .map_err(|e| AppError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = settings
            .endpoint
            .clone()
            .or_else(|| std::env::var("OLLAMA_URL").ok())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            retry,
        })
    }

    async fn embed_once(&self, url: &str, text: &str) -> Result<Vec<f32>, CallError> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(&e, true))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(CallError::from_status(status, &headers, &detail, true));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CallError::permanent(format!("invalid response body: {}", e)))?;

        if body.embedding.len() != self.dimensions {
            return Err(CallError::permanent(format!(
                "model '{}' returned {} dimensions, expected {}",
                self.model,
                body.embedding.len(),
                self.dimensions
            )));
        }

        Ok(body.embedding)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, text), fields(text_len = text.len(), model = %self.model))]
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("Cannot embed empty text".to_string()));
        }

        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let embedding = self
            .retry
            .run("ollama embeddings", || self.embed_once(&url, text))
            .await?;

        debug!(dimensions = embedding.len(), "Generated embedding");
        Ok(embedding)
    }
}
