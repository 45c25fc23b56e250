//! Knowledge base registry persisted as YAML.
//!
//! The registry lives at `<data_dir>/knowledge_bases.yaml` and records every
//! knowledge base with its counters.

use crate::types::KnowledgeBase;
use lumen_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const REGISTRY_FILE: &str = "knowledge_bases.yaml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    knowledge_bases: Vec<KnowledgeBase>,
}

/// Path of the registry file under `data_dir`.
pub fn registry_path(data_dir: &Path) -> PathBuf {
    data_dir.join(REGISTRY_FILE)
}

/// Load the registry, keyed by knowledge base id. A missing file is empty.
pub fn load_registry(path: &Path) -> AppResult<BTreeMap<String, KnowledgeBase>> {
    if !path.exists() {
        tracing::debug!(?path, "No knowledge base registry yet");
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| AppError::Storage(format!("Failed to read registry at {:?}: {}", path, e)))?;
    let file: RegistryFile = serde_yaml::from_str(&content)
        .map_err(|e| AppError::Storage(format!("Failed to parse registry at {:?}: {}", path, e)))?;

    tracing::debug!(count = file.knowledge_bases.len(), "Loaded knowledge base registry");
    Ok(file
        .knowledge_bases
        .into_iter()
        .map(|kb| (kb.id.clone(), kb))
        .collect())
}

/// Write the registry, replacing the previous file atomically.
pub fn save_registry(path: &Path, bases: &BTreeMap<String, KnowledgeBase>) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Storage(format!("Failed to create registry directory: {}", e)))?;
    }

    let file = RegistryFile {
        knowledge_bases: bases.values().cloned().collect(),
    };
    let yaml = serde_yaml::to_string(&file)?;

    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, yaml)
        .map_err(|e| AppError::Storage(format!("Failed to write registry to {:?}: {}", tmp, e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| AppError::Storage(format!("Failed to replace registry at {:?}: {}", path, e)))?;

    tracing::debug!(count = bases.len(), "Saved knowledge base registry");
    Ok(())
}
