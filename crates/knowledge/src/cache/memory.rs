//! In-process key-value store backed by moka.

use super::KvStore;
use lumen_core::AppResult;
use moka::future::Cache as MokaCache;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    data: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct ListEntry {
    /// Newest first
    items: VecDeque<String>,
    expires_at: Instant,
}

/// Values live in a moka cache with per-entry expiry; bounded lists live in
/// a plain map behind a mutex and are dropped once expired whenever the map
/// is touched.
#[derive(Debug)]
pub struct MemoryKvStore {
    values: MokaCache<String, Entry>,
    lists: Mutex<HashMap<String, ListEntry>>,
}

impl MemoryKvStore {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            values: MokaCache::builder().max_capacity(max_capacity).build(),
            lists: Mutex::new(HashMap::new()),
        }
    }
}

/// Remove expired lists, returning how many were dropped.
fn drop_expired_lists(lists: &mut HashMap<String, ListEntry>, now: Instant) -> usize {
    let before = lists.len();
    lists.retain(|_, l| l.expires_at > now);
    before - lists.len()
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        match self.values.get(key).await {
            Some(entry) if entry.expires_at <= Instant::now() => {
                self.values.invalidate(key).await;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.data)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let entry = Entry {
            data: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.values.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let value = self.values.remove(key).await.is_some();
        let list = self.lists.lock().await.remove(key).is_some();
        Ok(value || list)
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.as_ref().clone())
            .collect();

        let mut lists = self.lists.lock().await;
        drop_expired_lists(&mut lists, now);
        keys.extend(lists.keys().filter(|k| k.starts_with(prefix)).cloned());
        keys.sort();
        Ok(keys)
    }

    async fn push_bounded(&self, key: &str, value: &str, max_len: usize, ttl: Duration) -> AppResult<()> {
        let now = Instant::now();
        let mut lists = self.lists.lock().await;
        drop_expired_lists(&mut lists, now);
        let list = lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: now,
        });

        list.items.push_front(value.to_string());
        list.items.truncate(max_len.max(1));
        list.expires_at = now + ttl;
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> AppResult<Vec<String>> {
        let mut lists = self.lists.lock().await;
        let expired = matches!(lists.get(key), Some(list) if list.expires_at <= Instant::now());
        if expired {
            lists.remove(key);
        }
        Ok(lists
            .get(key)
            .map(|list| list.items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .values
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        for key in &expired {
            self.values.invalidate(key).await;
        }

        let lists_dropped = drop_expired_lists(&mut *self.lists.lock().await, now);
        Ok(expired.len() + lists_dropped)
    }
}
