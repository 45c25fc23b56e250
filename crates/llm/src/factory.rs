//! Generation client factory.

use crate::client::LlmClient;
use crate::providers::ollama::DEFAULT_OLLAMA_URL;
use crate::providers::{MockClient, OllamaClient};
use crate::retry::RetryPolicy;
use lumen_core::{AppError, AppResult};
use std::sync::Arc;

/// Known generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Ollama,
    Mock,
}

impl ProviderType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Mock => "mock",
        }
    }
}

/// Create a generation client for `provider`.
///
/// # Errors
/// `AppError::Config` for an unknown provider, `AppError::Provider` if the
/// HTTP client cannot be built.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    retry: RetryPolicy,
) -> AppResult<Arc<dyn LlmClient>> {
    match ProviderType::parse(provider) {
        Some(ProviderType::Ollama) => {
            let base_url = endpoint.unwrap_or(DEFAULT_OLLAMA_URL);
            Ok(Arc::new(OllamaClient::with_base_url(base_url, retry)?))
        }
        Some(ProviderType::Mock) => Ok(Arc::new(MockClient::new())),
        None => Err(AppError::Config(format!(
            "Unknown generation provider: {}",
            provider
        ))),
    }
}
