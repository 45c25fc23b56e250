//! Cache maintenance commands.

use super::print_json;
use clap::{Args, Subcommand};
use lumen_core::{config::AppConfig, AppResult};
use lumen_knowledge::CacheService;

/// Response and session cache maintenance
#[derive(Args, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove expired entries now instead of waiting for eviction
    Sweep,
    /// Show backend health and key counts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl CacheCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let cache = CacheService::from_settings(&config.cache).await;
        cache.connect().await;

        match &self.action {
            CacheAction::Sweep => {
                let removed = cache.clear_expired().await;
                println!("Removed {} expired cache entries", removed);
            }
            CacheAction::Stats { json } => {
                let stats = cache.stats().await;
                if *json {
                    print_json(&stats)?;
                } else {
                    println!("Cache backend: {} ({})", stats.backend, stats.status);
                    println!("  Sessions: {}", stats.sessions);
                    println!("  Message lists: {}", stats.message_lists);
                    println!("  Responses: {}", stats.responses);
                }
            }
        }

        cache.disconnect().await;
        Ok(())
    }
}
