//! Exponential, jittered, capped retry for outbound provider calls.
//!
//! Callers classify each failure as [`CallError::Transient`] or
//! [`CallError::Permanent`]; only transient failures are retried. The
//! classification helpers encode which failures count as transient for
//! idempotent calls (embeddings) and non-idempotent calls (generation).

use lumen_core::config::RetrySettings;
use lumen_core::AppError;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Outcome of a single failed attempt.
#[derive(Debug, Clone)]
pub enum CallError {
    /// Worth another attempt, optionally after a server-requested delay
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Retrying cannot help
    Permanent(String),
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } => message,
            Self::Permanent(message) => message,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify a transport-level failure.
    ///
    /// Idempotent calls retry on any network failure. Non-idempotent calls
    /// only retry when the connection was never established, since the
    /// server cannot have acted on the request.
    pub fn from_reqwest(err: &reqwest::Error, idempotent: bool) -> Self {
        let message = format!("request failed: {}", err);
        let retry = if idempotent {
            err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
        } else {
            err.is_connect()
        };
        if retry {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 429 is always retryable and honors `Retry-After`. 5xx is retryable
    /// only for idempotent calls.
    pub fn from_status(status: StatusCode, headers: &HeaderMap, body: &str, idempotent: bool) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Self::Transient {
                message,
                retry_after: parse_retry_after(headers),
            };
        }
        if status.is_server_error() && idempotent {
            return Self::transient(message);
        }
        Self::permanent(message)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Backoff schedule shared by the generation and embedding clients.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_base: f64,
    pub jitter: f64,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_base: settings.backoff_base.max(1.0),
            jitter: settings.jitter.clamp(0.0, 1.0),
            request_timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay before retry number `attempt`, jittered and capped.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jittered = if self.jitter > 0.0 && base > 0.0 {
            let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            (base * (1.0 + factor)).max(0.0)
        } else {
            base
        };
        let delay = Duration::from_millis(jittered as u64);
        let delay = match retry_after {
            Some(server) if server > delay => server,
            _ => delay,
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The final failure is reported as [`AppError::Provider`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(CallError::Permanent(message)) => {
                    tracing::debug!(operation, attempt, error = %message, "Permanent failure");
                    return Err(AppError::Provider(format!("{}: {}", operation, message)));
                }
                Err(CallError::Transient { message, retry_after }) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            operation,
                            attempts = attempt,
                            error = %message,
                            "Retries exhausted"
                        );
                        return Err(AppError::Provider(format!(
                            "{} failed after {} attempts: {}",
                            operation, attempt, message
                        )));
                    }
                    let delay = self.delay_for(attempt, retry_after);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_base_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(2, None).as_millis();
            assert!((1500..=2500).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_retry_after_is_honored_but_capped() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(600))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_status_classification() {
        let headers = HeaderMap::new();
        assert!(CallError::from_status(StatusCode::TOO_MANY_REQUESTS, &headers, "", false).is_transient());
        assert!(CallError::from_status(StatusCode::BAD_GATEWAY, &headers, "", true).is_transient());
        assert!(!CallError::from_status(StatusCode::BAD_GATEWAY, &headers, "", false).is_transient());
        assert!(!CallError::from_status(StatusCode::BAD_REQUEST, &headers, "", true).is_transient());
    }

    #[test]
    fn test_parse_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "3".parse().unwrap());
        match CallError::from_status(StatusCode::TOO_MANY_REQUESTS, &headers, "slow down", false) {
            CallError::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)))
            }
            other => panic!("expected transient, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy(3)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CallError::transient("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy(5)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::permanent("bad request"))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::Provider(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy(3)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::transient("down"))
                }
            })
            .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("after 3 attempts"), "{}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
