//! Raw document storage.
//!
//! Keys are relative slash-separated paths such as
//! `knowledge_bases/{kb_id}/documents/{document_id}.txt`.

use lumen_core::{AppError, AppResult};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

/// Key for a document's raw text.
pub fn document_key(kb_id: &str, document_id: &str) -> String {
    format!("{}{}.txt", documents_prefix(kb_id), document_id)
}

/// Prefix shared by every blob of one knowledge base.
pub fn kb_prefix(kb_id: &str) -> String {
    format!("knowledge_bases/{}/", kb_id)
}

fn documents_prefix(kb_id: &str) -> String {
    format!("{}documents/", kb_prefix(kb_id))
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, key: &str, data: &[u8]) -> AppResult<()>;

    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Remove every blob under `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> AppResult<Vec<String>>;
}

fn check_key(key: &str) -> AppResult<()> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid blob key '{}'", key)))
    }
}

/// Blobs stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        check_key(key.trim_end_matches('/'))?;
        Ok(self.root.join(key.trim_end_matches('/')))
    }

    async fn collect_files(&self, dir: PathBuf, out: &mut Vec<String>) -> AppResult<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    out.push(key.join("/"));
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> AppResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write blob '{}': {}", key, e)))
    }

    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(format!("Failed to read blob '{}': {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        match tokio::fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(format!("Failed to delete blob '{}': {}", key, e))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }

        // Directory prefixes leave empty directories behind otherwise.
        if prefix.ends_with('/') {
            let dir = self.path_for(prefix)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AppError::Storage(format!("Failed to remove {:?}: {}", dir, e))),
            }
        }
        Ok(keys.len())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_files(self.root.clone(), &mut keys).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

/// Blobs held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> AppResult<()> {
        check_key(key)?;
        self.blobs.write().await.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|k, _| !k.starts_with(prefix));
        Ok(before - blobs.len())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
