use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

use vaio_core::{KnowledgeRef, MetadataStore, VaioConfig};
use vaio_pipeline::set_knowledge;
use vaio_rag::{EmbeddingClient, KnowledgeIndex, Retriever};

#[derive(Subcommand, Debug)]
pub enum KbCommand {
    /// Point an asset at a knowledge base (a name, a path, or `none` to disable).
    Set { video: PathBuf, knowledge: String },
    /// Return an asset to the default knowledge base.
    ClearSetting { video: PathBuf },
    /// (Re)build the index from the source files.
    Build {
        #[command(flatten)]
        target: KbTarget,
    },
    /// Preview stored chunks.
    List {
        #[command(flatten)]
        target: KbTarget,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    Stats {
        #[command(flatten)]
        target: KbTarget,
    },
    /// Drop the indexed collection; source files stay untouched.
    Clear {
        #[command(flatten)]
        target: KbTarget,
    },
}

#[derive(Args, Debug)]
pub struct KbTarget {
    /// Use the knowledge base recorded for this asset.
    video: Option<PathBuf>,
    /// Explicit identity, overriding the asset's setting.
    #[arg(long)]
    knowledge: Option<String>,
}

impl KbTarget {
    fn identity(&self) -> KnowledgeRef {
        match (&self.knowledge, &self.video) {
            (Some(value), _) => normalize_identity(value),
            (None, Some(video)) => MetadataStore::for_asset(video).load().knowledge_ref(),
            (None, None) => KnowledgeRef::Default,
        }
    }
}

/// Paths that exist are stored canonicalized so later runs resolve them the same way.
fn normalize_identity(value: &str) -> KnowledgeRef {
    match KnowledgeRef::parse(value) {
        KnowledgeRef::Named(raw) if Path::new(&raw).exists() => fs::canonicalize(&raw)
            .map(|p| KnowledgeRef::Named(p.to_string_lossy().to_string()))
            .unwrap_or(KnowledgeRef::Named(raw)),
        other => other,
    }
}

fn open_index(cfg: &VaioConfig, identity: &KnowledgeRef) -> Result<KnowledgeIndex> {
    let roots = cfg.kb_roots();
    roots.ensure_default_dirs()?;
    let embedder = EmbeddingClient::from_config(cfg)?;
    let retriever = Retriever::new(roots, Arc::new(embedder), cfg.chunk_chars);
    let index = retriever
        .index_for(identity)
        .ok_or_else(|| anyhow!("knowledge base is disabled for this target"))??;
    Ok(index)
}

pub fn run(cfg: &VaioConfig, command: KbCommand) -> Result<()> {
    match command {
        KbCommand::Set { video, knowledge } => {
            let identity = normalize_identity(&knowledge);
            set_knowledge(&video, &identity)?;
            println!("knowledge for {} set to {}", video.display(), identity);
        }
        KbCommand::ClearSetting { video } => {
            set_knowledge(&video, &KnowledgeRef::Default)?;
            println!("knowledge for {} reset to default", video.display());
        }
        KbCommand::Build { target } => {
            let index = open_index(cfg, &target.identity())?;
            let stats = index.rebuild_from_source()?;
            info!(collection = %stats.collection, count = stats.count, "knowledge base built");
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        KbCommand::List { target, limit } => {
            let index = open_index(cfg, &target.identity())?;
            for chunk in index.list(limit)? {
                let preview: String = chunk.text.chars().take(160).collect();
                println!(
                    "{}",
                    serde_json::to_string(&json!({
                        "position": chunk.position,
                        "source": chunk.source,
                        "category": chunk.category,
                        "preview": preview.replace('\n', " "),
                    }))?
                );
            }
        }
        KbCommand::Stats { target } => {
            let index = open_index(cfg, &target.identity())?;
            println!("{}", serde_json::to_string_pretty(&index.stats()?)?);
        }
        KbCommand::Clear { target } => {
            let index = open_index(cfg, &target.identity())?;
            index.clear()?;
            println!("cleared collection {}", index.location().collection);
        }
    }
    Ok(())
}
