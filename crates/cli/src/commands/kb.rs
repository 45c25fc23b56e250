//! Knowledge base command handlers.

use super::{open, print_json};
use clap::{Args, Subcommand};
use lumen_core::{config::AppConfig, AppError, AppResult};
use lumen_knowledge::chunker::content_hash;
use lumen_knowledge::{read_document, KnowledgeBase, QueryOptions, RagAnswer, RagOrchestrator};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Knowledge base management and querying
#[derive(Args, Debug)]
pub struct KbCommand {
    #[command(subcommand)]
    pub action: KbAction,
}

#[derive(Subcommand, Debug)]
pub enum KbAction {
    /// Create a knowledge base
    Create(KbCreateCommand),
    /// List knowledge bases
    List(KbListCommand),
    /// Ingest files or directories into a knowledge base
    Add(KbAddCommand),
    /// Ask a question against one or more knowledge bases
    Ask(KbAskCommand),
    /// Remove one document from a knowledge base
    RmDoc(KbRmDocCommand),
    /// Delete a knowledge base with all of its documents
    Delete(KbDeleteCommand),
    /// Show knowledge base statistics
    Stats(KbStatsCommand),
}

/// Find a knowledge base by id, or by name when the name is unique.
async fn resolve_kb(orchestrator: &RagOrchestrator, id_or_name: &str) -> AppResult<KnowledgeBase> {
    if let Ok(kb) = orchestrator.get_knowledge_base(id_or_name).await {
        return Ok(kb);
    }
    let mut named: Vec<KnowledgeBase> = orchestrator
        .list_knowledge_bases()
        .await
        .into_iter()
        .filter(|kb| kb.name == id_or_name)
        .collect();
    match named.len() {
        0 => Err(AppError::kb_not_found(id_or_name)),
        1 => Ok(named.remove(0)),
        n => Err(AppError::Validation(format!(
            "{} knowledge bases are named '{}'; use an id",
            n, id_or_name
        ))),
    }
}

/// Create a knowledge base
#[derive(Args, Debug)]
pub struct KbCreateCommand {
    /// Display name
    pub name: String,

    /// Free-form description
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KbCreateCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let kb = orchestrator
            .create_knowledge_base(&self.name, &self.description, BTreeMap::new())
            .await?;
        orchestrator.stop().await?;

        if self.json {
            print_json(&kb)?;
        } else {
            println!("Created knowledge base '{}' ({})", kb.name, kb.id);
        }
        Ok(())
    }
}

/// List knowledge bases
#[derive(Args, Debug)]
pub struct KbListCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KbListCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let bases = orchestrator.list_knowledge_bases().await;

        if self.json {
            print_json(&bases)?;
        } else if bases.is_empty() {
            println!("No knowledge bases");
        } else {
            for kb in &bases {
                println!(
                    "{}  {}  ({} documents, {} chunks)",
                    kb.id, kb.name, kb.document_count, kb.total_chunks
                );
            }
        }
        Ok(())
    }
}

/// Ingest files or directories
#[derive(Args, Debug)]
pub struct KbAddCommand {
    /// Knowledge base id or name
    pub kb: String,

    /// Files or directories to ingest
    #[arg(long, required = true)]
    pub path: Vec<PathBuf>,

    /// Tags attached to every document
    #[arg(long)]
    pub tag: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KbAddCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let kb = resolve_kb(&orchestrator, &self.kb).await?;

        let files = collect_files(&self.path)?;
        tracing::info!(kb_id = %kb.id, files = files.len(), "Ingesting files");

        let mut reports = Vec::new();
        let mut failed = 0usize;
        for file in &files {
            let parsed = match read_document(file).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path = ?file, error = %e, "Skipping unreadable file");
                    failed += 1;
                    continue;
                }
            };
            let metadata = parsed.metadata.with_tags(self.tag.clone());
            let document_id = document_id_for(file);

            match orchestrator
                .add_document(&kb.id, &parsed.content, metadata, Some(&document_id))
                .await
            {
                Ok(report) => {
                    if !self.json {
                        println!(
                            "{}  {} chunks ({} degraded)  {}",
                            document_id,
                            report.chunks_stored,
                            report.chunks_degraded,
                            file.display()
                        );
                    }
                    reports.push(report);
                }
                Err(e) => {
                    // Status is recorded by the orchestrator; keep going
                    eprintln!("Failed to ingest {}: {}", file.display(), e);
                    failed += 1;
                }
            }
        }
        orchestrator.stop().await?;

        if self.json {
            print_json(&serde_json::json!({
                "kbId": kb.id,
                "documents": reports,
                "failed": failed,
            }))?;
        } else {
            println!("Ingested {} documents, {} failed", reports.len(), failed);
        }
        Ok(())
    }
}

/// Files under `paths`, directories walked recursively, sorted and deduplicated.
fn collect_files(paths: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            return Err(AppError::NotFound(format!("path {:?}", path)));
        }
        for entry in WalkDir::new(path).follow_links(true) {
            let entry = entry.map_err(|e| AppError::Other(format!("walking {:?}: {}", path, e)))?;
            let hidden = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with('.') && entry.depth() > 0)
                .unwrap_or(false);
            if entry.file_type().is_file() && !hidden {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Stable document id per path so re-adding a file replaces it.
fn document_id_for(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let hash = content_hash(&canonical.to_string_lossy());
    format!("doc_{}", &hash[..16])
}

/// Ask a question
#[derive(Args, Debug)]
pub struct KbAskCommand {
    /// Question text
    pub query: String,

    /// Knowledge base ids or names; repeat for several, omit for all
    #[arg(long = "kb")]
    pub kbs: Vec<String>,

    /// Number of sources to retrieve
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Minimum similarity in [0, 1]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KbAskCommand {
    fn options(&self, config: &AppConfig) -> QueryOptions {
        let mut options = QueryOptions::from(&config.rag);
        if let Some(k) = self.top_k {
            options.k = k;
        }
        if let Some(threshold) = self.threshold {
            options.threshold = threshold;
        }
        if self.no_cache {
            options = options.without_cache();
        }
        options
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let options = self.options(config);

        let answer = if self.kbs.len() == 1 {
            let kb = resolve_kb(&orchestrator, &self.kbs[0]).await?;
            orchestrator.query(&kb.id, &self.query, &options).await?
        } else {
            let mut ids = Vec::with_capacity(self.kbs.len());
            for id_or_name in &self.kbs {
                match resolve_kb(&orchestrator, id_or_name).await {
                    Ok(kb) => ids.push(kb.id),
                    // Unknown ids are reported by the orchestrator
                    Err(_) => ids.push(id_or_name.clone()),
                }
            }
            orchestrator.query_multiple(&ids, &self.query, &options).await?
        };
        orchestrator.stop().await?;

        tracing::debug!(
            confidence = answer.confidence,
            sources = answer.sources.len(),
            found = answer.total_sources_found,
            cached = answer.cached,
            "Query answered"
        );

        if self.json {
            print_json(&answer)?;
        } else {
            print_answer(&answer);
        }
        Ok(())
    }
}

fn print_answer(answer: &RagAnswer) {
    println!("Answer:");
    println!("{}", answer.response);
    println!();

    if answer.sources.is_empty() {
        println!("Sources: (none above threshold)");
        return;
    }
    println!(
        "Sources (confidence {:.2}{}):",
        answer.confidence,
        if answer.cached { ", cached" } else { "" }
    );
    for source in &answer.sources {
        println!(
            "- {} [{}] score {:.3}",
            source.title, source.chunk_id, source.similarity_score
        );
    }
}

/// Remove one document
#[derive(Args, Debug)]
pub struct KbRmDocCommand {
    /// Knowledge base id or name
    pub kb: String,

    /// Document id as printed by `kb add`
    pub document_id: String,
}

impl KbRmDocCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let kb = resolve_kb(&orchestrator, &self.kb).await?;
        let removed = orchestrator.delete_document(&kb.id, &self.document_id).await?;
        orchestrator.stop().await?;

        println!("Removed document {} ({} chunks)", self.document_id, removed);
        Ok(())
    }
}

/// Delete a knowledge base
#[derive(Args, Debug)]
pub struct KbDeleteCommand {
    /// Knowledge base id or name
    pub kb: String,
}

impl KbDeleteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let kb = resolve_kb(&orchestrator, &self.kb).await?;
        orchestrator.delete_knowledge_base(&kb.id).await?;
        orchestrator.stop().await?;

        println!("Deleted knowledge base '{}' ({})", kb.name, kb.id);
        Ok(())
    }
}

/// Show knowledge base statistics
#[derive(Args, Debug)]
pub struct KbStatsCommand {
    /// Knowledge base id or name
    pub kb: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KbStatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orchestrator = open(config).await?;
        let kb = resolve_kb(&orchestrator, &self.kb).await?;
        let stats = orchestrator.stats(&kb.id).await?;

        if self.json {
            print_json(&stats)?;
        } else {
            println!("Knowledge base: {} ({})", stats.name, stats.id);
            println!("  Documents: {}", stats.document_count);
            println!("  Chunks: {}", stats.total_chunks);
            println!("  Avg chunk length: {:.1} chars", stats.avg_chunk_length);
            println!("  Updated: {}", stats.updated_at);
        }
        Ok(())
    }
}

impl KbCommand {
    pub fn name(&self) -> &'static str {
        match &self.action {
            KbAction::Create(_) => "kb.create",
            KbAction::List(_) => "kb.list",
            KbAction::Add(_) => "kb.add",
            KbAction::Ask(_) => "kb.ask",
            KbAction::RmDoc(_) => "kb.rm-doc",
            KbAction::Delete(_) => "kb.delete",
            KbAction::Stats(_) => "kb.stats",
        }
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            KbAction::Create(cmd) => cmd.execute(config).await,
            KbAction::List(cmd) => cmd.execute(config).await,
            KbAction::Add(cmd) => cmd.execute(config).await,
            KbAction::Ask(cmd) => cmd.execute(config).await,
            KbAction::RmDoc(cmd) => cmd.execute(config).await,
            KbAction::Delete(cmd) => cmd.execute(config).await,
            KbAction::Stats(cmd) => cmd.execute(config).await,
        }
    }
}
