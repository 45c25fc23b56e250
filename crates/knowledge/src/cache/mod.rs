//! TTL cache for sessions, message history and computed responses.
//!
//! [`CacheService`] never returns an error: when the backend is missing or
//! unreachable, writes become no-ops and reads become misses. Failures are
//! logged at `warn`.

pub mod memory;
pub mod redis;

pub use memory::MemoryKvStore;
pub use self::redis::RedisKvStore;

use crate::types::{ChatMessage, ChatSession};
use lumen_core::config::CacheSettings;
use lumen_core::AppResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Key-value backend with per-key expiry and bounded lists.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    fn backend_name(&self) -> &str;

    async fn ping(&self) -> AppResult<()>;

    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Remove a value or list; returns whether anything was removed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Live keys starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;

    /// Push to the front of a list, keep the newest `max_len`, refresh TTL.
    async fn push_bounded(&self, key: &str, value: &str, max_len: usize, ttl: Duration) -> AppResult<()>;

    /// Up to `limit` list items, newest first.
    async fn list_range(&self, key: &str, limit: usize) -> AppResult<Vec<String>>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> AppResult<usize>;
}

/// Cache namespace, each with its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Session,
    Messages,
    Response,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Messages => "messages",
            Self::Response => "response",
        }
    }
}

/// Key counts per namespace plus backend health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub backend: String,
    /// "connected", "disconnected" or "error"
    pub status: String,
    pub sessions: usize,
    pub message_lists: usize,
    pub responses: usize,
}

#[derive(Debug)]
pub struct CacheService {
    store: Option<Arc<dyn KvStore>>,
    connected: AtomicBool,
    session_ttl: Duration,
    messages_ttl: Duration,
    response_ttl: Duration,
    max_messages: usize,
}

impl CacheService {
    /// Wrap `store`; `None` yields a permanently disabled cache.
    pub fn new(store: Option<Arc<dyn KvStore>>, settings: &CacheSettings) -> Self {
        let connected = store.is_some();
        Self {
            store,
            connected: AtomicBool::new(connected),
            session_ttl: Duration::from_secs(settings.session_ttl_secs),
            messages_ttl: Duration::from_secs(settings.messages_ttl_secs),
            response_ttl: Duration::from_secs(settings.response_ttl_secs),
            max_messages: settings.max_messages.max(1),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, &CacheSettings::default())
    }

    /// Build the backend named in `settings`.
    ///
    /// An unreachable Redis server leaves the cache disabled rather than
    /// failing startup.
    pub async fn from_settings(settings: &CacheSettings) -> Self {
        let store: Option<Arc<dyn KvStore>> = match settings.backend.as_str() {
            "memory" => Some(Arc::new(MemoryKvStore::new(settings.max_capacity))),
            "redis" => {
                let url = settings.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379");
                match RedisKvStore::connect(url, settings.key_prefix.clone()).await {
                    Ok(store) => Some(Arc::new(store)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Redis connection failed, continuing without cache");
                        None
                    }
                }
            }
            _ => None,
        };
        Self::new(store, settings)
    }

    fn active(&self) -> Option<&Arc<dyn KvStore>> {
        if self.connected.load(Ordering::Relaxed) {
            self.store.as_ref()
        } else {
            None
        }
    }

    fn key(ns: Namespace, key: &str) -> String {
        format!("{}:{}", ns.as_str(), key)
    }

    pub fn default_ttl(&self, ns: Namespace) -> Duration {
        match ns {
            Namespace::Session => self.session_ttl,
            Namespace::Messages => self.messages_ttl,
            Namespace::Response => self.response_ttl,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_some()
    }

    /// Ping the backend and enable the cache if it answers.
    pub async fn connect(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.ping().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Relaxed);
                tracing::debug!(backend = store.backend_name(), "Cache connected");
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                tracing::warn!(error = %e, "Cache backend unreachable, continuing without cache");
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Store `value`; `ttl` defaults to the namespace TTL.
    pub async fn put(&self, ns: Namespace, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let Some(store) = self.active() else {
            return false;
        };
        let ttl = ttl.unwrap_or_else(|| self.default_ttl(ns));
        match store.set_ex(&Self::key(ns, key), value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Cache write failed");
                false
            }
        }
    }

    pub async fn get(&self, ns: Namespace, key: &str) -> Option<String> {
        let store = self.active()?;
        match store.get(&Self::key(ns, key)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub async fn delete(&self, ns: Namespace, key: &str) -> bool {
        let Some(store) = self.active() else {
            return false;
        };
        match store.delete(&Self::key(ns, key)).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Push `value` and keep only the newest `max_len` items.
    pub async fn append_bounded(&self, ns: Namespace, key: &str, value: &str, max_len: usize) -> bool {
        let Some(store) = self.active() else {
            return false;
        };
        let ttl = self.default_ttl(ns);
        match store.push_bounded(&Self::key(ns, key), value, max_len, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Cache append failed");
                false
            }
        }
    }

    async fn range(&self, ns: Namespace, key: &str, limit: usize) -> Vec<String> {
        let Some(store) = self.active() else {
            return Vec::new();
        };
        match store.list_range(&Self::key(ns, key), limit).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Cache range read failed");
                Vec::new()
            }
        }
    }

    /// Housekeeping sweep. Backends with native expiry report zero.
    pub async fn clear_expired(&self) -> usize {
        let Some(store) = self.active() else {
            return 0;
        };
        match store.purge_expired().await {
            Ok(n) => {
                tracing::debug!(removed = n, "Swept expired cache entries");
                n
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache sweep failed");
                0
            }
        }
    }

    async fn put_json<T: Serialize>(&self, ns: Namespace, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.put(ns, key, &json, None).await,
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Cache value not serializable");
                false
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Option<T> {
        let raw = self.get(ns, key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(namespace = ns.as_str(), key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    pub async fn cache_session(&self, session: &ChatSession) -> bool {
        self.put_json(Namespace::Session, &session.id, session).await
    }

    pub async fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        self.get_json(Namespace::Session, session_id).await
    }

    /// Remove a session and its message history.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let session = self.delete(Namespace::Session, session_id).await;
        let messages = self.delete(Namespace::Messages, session_id).await;
        session || messages
    }

    pub async fn cache_message(&self, session_id: &str, message: &ChatMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => {
                self.append_bounded(Namespace::Messages, session_id, &json, self.max_messages)
                    .await
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Message not serializable");
                false
            }
        }
    }

    /// The most recent `limit` messages, oldest first.
    pub async fn get_messages(&self, session_id: &str, limit: usize) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .range(Namespace::Messages, session_id, limit)
            .await
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();
        messages.reverse();
        messages
    }

    pub async fn cache_response<T: Serialize>(&self, key: &str, response: &T) -> bool {
        self.put_json(Namespace::Response, key, response).await
    }

    pub async fn get_cached_response<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_json(Namespace::Response, key).await
    }

    pub async fn stats(&self) -> CacheStats {
        let backend = self
            .store
            .as_ref()
            .map(|s| s.backend_name().to_string())
            .unwrap_or_else(|| "none".to_string());
        let mut stats = CacheStats {
            backend,
            status: "disconnected".to_string(),
            sessions: 0,
            message_lists: 0,
            responses: 0,
        };
        let Some(store) = self.active() else {
            return stats;
        };

        let mut counts = [0usize; 3];
        for (slot, ns) in [Namespace::Session, Namespace::Messages, Namespace::Response]
            .iter()
            .enumerate()
        {
            match store.scan_prefix(&format!("{}:", ns.as_str())).await {
                Ok(keys) => counts[slot] = keys.len(),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache stats unavailable");
                    stats.status = "error".to_string();
                    return stats;
                }
            }
        }

        stats.status = "connected".to_string();
        stats.sessions = counts[0];
        stats.message_lists = counts[1];
        stats.responses = counts[2];
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;
    use lumen_core::AppError;

    /// Every call fails as if the server went away.
    #[derive(Debug)]
    struct DownStore;

    #[async_trait::async_trait]
    impl KvStore for DownStore {
        fn backend_name(&self) -> &str {
            "down"
        }
        async fn ping(&self) -> AppResult<()> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn get(&self, _key: &str) -> AppResult<Option<String>> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> AppResult<()> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> AppResult<bool> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn scan_prefix(&self, _prefix: &str) -> AppResult<Vec<String>> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn push_bounded(&self, _key: &str, _value: &str, _max: usize, _ttl: Duration) -> AppResult<()> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn list_range(&self, _key: &str, _limit: usize) -> AppResult<Vec<String>> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
        async fn purge_expired(&self) -> AppResult<usize> {
            Err(AppError::CacheUnavailable("connection refused".into()))
        }
    }

    fn memory_cache(settings: &CacheSettings) -> CacheService {
        CacheService::new(Some(Arc::new(MemoryKvStore::default())), settings)
    }

    #[tokio::test]
    async fn test_hit_before_ttl_miss_after() {
        let cache = memory_cache(&CacheSettings::default());
        let ttl = Some(Duration::from_millis(50));

        assert!(cache.put(Namespace::Response, "q", "answer", ttl).await);
        assert_eq!(cache.get(Namespace::Response, "q").await.as_deref(), Some("answer"));
        // Namespaces are separate
        assert_eq!(cache.get(Namespace::Session, "q").await, None);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get(Namespace::Response, "q").await, None);
    }

    #[tokio::test]
    async fn test_outage_degrades_to_miss() {
        let cache = CacheService::new(Some(Arc::new(DownStore)), &CacheSettings::default());

        assert!(!cache.put(Namespace::Response, "k", "v", None).await);
        assert_eq!(cache.get(Namespace::Response, "k").await, None);
        assert!(!cache.append_bounded(Namespace::Messages, "s", "m", 5).await);
        assert!(cache.get_messages("s", 10).await.is_empty());
        assert_eq!(cache.clear_expired().await, 0);
        assert_eq!(cache.stats().await.status, "error");

        assert!(!cache.connect().await);
        assert!(!cache.is_connected());
        assert_eq!(cache.stats().await.status, "disconnected");
    }

    #[tokio::test]
    async fn test_disabled_cache_is_silent() {
        let cache = CacheService::disabled();
        assert!(!cache.connect().await);
        assert!(!cache.cache_session(&ChatSession::new("m")).await);
        assert_eq!(cache.get_session("x").await, None);
        assert_eq!(cache.stats().await.backend, "none");
    }

    #[tokio::test]
    async fn test_messages_are_bounded_and_chronological() {
        let settings = CacheSettings {
            max_messages: 3,
            ..Default::default()
        };
        let cache = memory_cache(&settings);

        for n in 0..5 {
            let message = ChatMessage::new(MessageRole::User, format!("msg {}", n));
            assert!(cache.cache_message("s1", &message).await);
        }

        let contents: Vec<String> = cache
            .get_messages("s1", 50)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);

        let last_two: Vec<String> = cache
            .get_messages("s1", 2)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(last_two, vec!["msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_stats() {
        let cache = memory_cache(&CacheSettings::default());
        let session = ChatSession::new("llama3.2");

        cache.cache_session(&session).await;
        cache
            .cache_message(&session.id, &ChatMessage::new(MessageRole::User, "hi"))
            .await;
        cache.cache_response("abc", &serde_json::json!({"response": "x"})).await;

        assert_eq!(cache.get_session(&session.id).await, Some(session.clone()));
        let stats = cache.stats().await;
        assert_eq!(stats.status, "connected");
        assert_eq!((stats.sessions, stats.message_lists, stats.responses), (1, 1, 1));

        assert!(cache.delete_session(&session.id).await);
        assert_eq!(cache.get_session(&session.id).await, None);
        assert!(cache.get_messages(&session.id, 10).await.is_empty());

        cache.disconnect().await;
        assert_eq!(cache.get_cached_response::<serde_json::Value>("abc").await, None);
        assert!(cache.connect().await);
        assert!(cache.get_cached_response::<serde_json::Value>("abc").await.is_some());
    }
}
