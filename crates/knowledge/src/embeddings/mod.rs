//! Batched, failure-isolated embedding.
//!
//! [`EmbeddingService::embed`] never fails as a whole: each input maps to an
//! [`Embedding`] that is either a real vector or a tagged zero-vector
//! placeholder, so callers decide what to do with degraded items.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};

use crate::chunker::content_hash;
use futures::stream::{self, StreamExt};
use lumen_core::config::EmbeddingSettings;
use lumen_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Per-item embedding outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Embedding {
    Ok(Vec<f32>),
    Degraded { vector: Vec<f32>, reason: String },
}

impl Embedding {
    pub fn vector(&self) -> &[f32] {
        match self {
            Self::Ok(vector) => vector,
            Self::Degraded { vector, .. } => vector,
        }
    }

    pub fn into_vector(self) -> Vec<f32> {
        match self {
            Self::Ok(vector) => vector,
            Self::Degraded { vector, .. } => vector,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Wraps a provider with batching, bounded concurrency and per-item timeouts.
#[derive(Debug, Clone)]
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrency: usize,
    item_timeout: Duration,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: &EmbeddingSettings) -> Self {
        Self {
            provider,
            batch_size: settings.batch_size.max(1),
            max_concurrency: settings.max_concurrency.max(1),
            item_timeout: Duration::from_secs(settings.item_timeout_secs.max(1)),
        }
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `texts`, preserving order and length.
    ///
    /// Batches of `batch_size` run one after another; inside a batch at most
    /// `max_concurrency` requests are in flight.
    pub async fn embed(&self, texts: &[String]) -> Vec<Embedding> {
        let mut results = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            let embedded: Vec<Embedding> = stream::iter(batch.iter().enumerate())
                .map(|(i, text)| self.embed_item(offset + i, text))
                .buffered(self.max_concurrency)
                .collect()
                .await;
            results.extend(embedded);
        }

        let degraded = results.iter().filter(|e| e.is_degraded()).count();
        tracing::debug!(
            total = results.len(),
            degraded,
            model = self.provider.model_name(),
            "Embedded texts"
        );
        results
    }

    async fn embed_item(&self, index: usize, text: &str) -> Embedding {
        let dims = self.provider.dimensions();
        let reason = match tokio::time::timeout(self.item_timeout, self.provider.embed(text)).await {
            Ok(Ok(vector)) if vector.len() == dims => return Embedding::Ok(vector),
            Ok(Ok(vector)) => format!("expected {} dimensions, got {}", dims, vector.len()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.item_timeout),
        };

        let hash = content_hash(text);
        tracing::warn!(
            index,
            text_hash = &hash[..12],
            reason = %reason,
            "Embedding degraded to zero vector"
        );
        Embedding::Degraded {
            vector: vec![0.0; dims],
            reason,
        }
    }

    /// Embed a single query. Unlike [`embed`](Self::embed), failure is fatal.
    pub async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        let vector = tokio::time::timeout(self.item_timeout, self.provider.embed(text))
            .await
            .map_err(|_| AppError::Provider("query embedding timed out".to_string()))?
            .map_err(|e| match e {
                AppError::Provider(msg) => AppError::Provider(msg),
                other => AppError::Provider(format!("query embedding failed: {}", other)),
            })?;

        if vector.len() != self.provider.dimensions() {
            return Err(AppError::Provider(format!(
                "query embedding has {} dimensions, expected {}",
                vector.len(),
                self.provider.dimensions()
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails on "FAIL", hangs on "SLOW", tracks concurrent calls.
    #[derive(Debug, Default)]
    struct FlakyProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "flaky"
        }
        fn model_name(&self) -> &str {
            "flaky-v1"
        }
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = if text.contains("FAIL") {
                Err(AppError::Provider("upstream 500".into()))
            } else if text.contains("SLOW") {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(vec![1.0; 4])
            } else if text.contains("SHORT") {
                Ok(vec![1.0; 2])
            } else {
                Ok(vec![text.len() as f32, 0.0, 0.0, 1.0])
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn settings(batch_size: usize, max_concurrency: usize) -> EmbeddingSettings {
        EmbeddingSettings {
            batch_size,
            max_concurrency,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failures_degrade_only_their_item() {
        let service = EmbeddingService::new(Arc::new(FlakyProvider::default()), &settings(10, 4))
            .with_item_timeout(Duration::from_millis(200));
        let texts: Vec<String> = ["a", "FAIL", "ccc", "SLOW", "SHORT", "ffffff"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let out = service.embed(&texts).await;

        assert_eq!(out.len(), texts.len());
        assert_eq!(out[0], Embedding::Ok(vec![1.0, 0.0, 0.0, 1.0]));
        assert!(out[1].is_degraded());
        assert_eq!(out[2], Embedding::Ok(vec![3.0, 0.0, 0.0, 1.0]));
        assert!(out[3].is_degraded());
        assert!(out[4].is_degraded());
        assert_eq!(out[5].vector()[0], 6.0);
        assert_eq!(out[1].vector(), &[0.0; 4]);
        match &out[3] {
            Embedding::Degraded { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected degraded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_order_preserved_across_batches() {
        let service = EmbeddingService::new(Arc::new(FlakyProvider::default()), &settings(3, 2));
        let texts: Vec<String> = (1..=8).map(|n| "x".repeat(n)).collect();

        let out = service.embed(&texts).await;
        let firsts: Vec<f32> = out.iter().map(|e| e.vector()[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let provider = Arc::new(FlakyProvider::default());
        let service = EmbeddingService::new(provider.clone(), &settings(50, 3));
        let texts: Vec<String> = (0..20).map(|n| format!("text {}", n)).collect();

        service.embed(&texts).await;
        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {}", peak);
        assert!(peak >= 2);
    }

    #[tokio::test]
    async fn test_embed_query_failure_is_fatal() {
        let service = EmbeddingService::new(Arc::new(FlakyProvider::default()), &settings(10, 4));
        assert!(matches!(
            service.embed_query("FAIL").await,
            Err(AppError::Provider(_))
        ));
        assert!(service.embed_query("SHORT").await.is_err());
        assert_eq!(service.embed_query("ok").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_provider_roundtrip() {
        let service = EmbeddingService::new(Arc::new(MockProvider::new(32)), &settings(10, 4));
        let out = service.embed(&["hello world".to_string()]).await;
        assert_eq!(out[0].vector().len(), 32);
        assert!(!out[0].is_degraded());
    }
}
