//! Offline generation client.
//!
//! Produces a deterministic answer derived from the prompt so pipelines can
//! run end to end without a model server.

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
use lumen_core::AppResult;

#[derive(Debug, Default, Clone)]
pub struct MockClient {
    canned: Option<String>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `response`.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            canned: Some(response.into()),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        let content = match &self.canned {
            Some(text) => text.clone(),
            None => format!(
                "Answer generated from a {}-character prompt.",
                request.prompt.chars().count()
            ),
        };

        let prompt_tokens = request.prompt.split_whitespace().count() as u32;
        let completion_tokens = content.split_whitespace().count() as u32;

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            usage: LlmUsage::new(prompt_tokens, completion_tokens),
        })
    }
}
