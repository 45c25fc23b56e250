//! Redis key-value store.

use super::KvStore;
use lumen_core::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::fmt;
use std::time::Duration;

/// Redis-backed store using native TTLs and lists.
///
/// Keys are namespaced as `{prefix}:{key}` when a prefix is set.
#[derive(Clone)]
pub struct RedisKvStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("key_prefix", &self.key_prefix)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

fn unavailable(action: &str, err: redis::RedisError) -> AppError {
    AppError::CacheUnavailable(format!("{}: {}", action, err))
}

impl RedisKvStore {
    /// Open a managed connection; fails if the server is unreachable.
    pub async fn connect(url: &str, key_prefix: Option<String>) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::CacheUnavailable(format!("invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("Failed to connect to Redis", e))?;

        tracing::info!(url, "Connected to Redis");
        Ok(Self {
            connection,
            key_prefix,
        })
    }

    fn prefix_key(&self, key: &str) -> String {
        prefix_key(self.key_prefix.as_deref(), key)
    }
}

fn prefix_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, key),
        None => key.to_string(),
    }
}

/// Inverse of `prefix_key`; keys outside the namespace come back unchanged.
fn strip_prefix(prefix: Option<&str>, key: String) -> String {
    match prefix {
        Some(prefix) => key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix(':'))
            .map(str::to_string)
            .unwrap_or(key),
        None => key,
    }
}

/// `SCAN MATCH` pattern for every key under `namespaced`, with glob
/// metacharacters in the literal part escaped.
fn scan_pattern(namespaced: &str) -> String {
    let mut pattern = String::with_capacity(namespaced.len() + 1);
    for c in namespaced.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait::async_trait]
impl KvStore for RedisKvStore {
    fn backend_name(&self) -> &str {
        "redis"
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| unavailable("PING failed", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(self.prefix_key(key))
            .await
            .map_err(|e| unavailable("GET failed", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(self.prefix_key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| unavailable("SETEX failed", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.connection.clone();
        let deleted: i64 = conn
            .del(self.prefix_key(key))
            .await
            .map_err(|e| unavailable("DEL failed", e))?;
        Ok(deleted > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = scan_pattern(&self.prefix_key(prefix));
        let mut cursor = 0u64;
        let mut found = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("SCAN failed", e))?;

            found.extend(
                keys.into_iter()
                    .map(|k| strip_prefix(self.key_prefix.as_deref(), k)),
            );
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn push_bounded(&self, key: &str, value: &str, max_len: usize, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let key = self.prefix_key(key);
        let last = max_len.max(1) as isize - 1;

        redis::pipe()
            .atomic()
            .lpush(&key, value)
            .ignore()
            .ltrim(&key, 0, last)
            .ignore()
            .expire(&key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| unavailable("LPUSH failed", e))
    }

    async fn list_range(&self, key: &str, limit: usize) -> AppResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        conn.lrange(self.prefix_key(key), 0, limit as isize - 1)
            .await
            .map_err(|e| unavailable("LRANGE failed", e))
    }

    /// Redis expires keys itself; nothing to sweep.
    async fn purge_expired(&self) -> AppResult<usize> {
        Ok(0)
    }
}
