//! Command handlers for the Lumen CLI.

pub mod cache;
pub mod kb;

pub use cache::CacheCommand;
pub use kb::KbCommand;

use lumen_core::{config::AppConfig, AppResult};
use lumen_knowledge::RagOrchestrator;
use serde::Serialize;

/// Build the orchestrator from config and load the registry.
pub(crate) async fn open(config: &AppConfig) -> AppResult<RagOrchestrator> {
    let orchestrator = RagOrchestrator::from_config(config).await?;
    orchestrator.start().await?;
    Ok(orchestrator)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
