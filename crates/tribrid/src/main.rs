//! # tribrid
//!
//! A local-first tri-brid (dense + sparse + graph) retrieval and fusion
//! engine with provider-routed chat orchestration.
//!
//! ## Architecture
//!
//! ```text
//! Filesystem corpora → Chunking → Embedding → SQLite (vector + FTS5 + graph edges)
//!   → Fusion & Shaping → Chat Orchestrator (provider routing, SSE) → CLI / HTTP server
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`db`] — SQLite connection management
//! - [`migrate`] — Database schema migrations
//! - [`sqlite_store`] — [`tribrid_core::store::Store`] implementation over SQLite + FTS5
//! - [`indexer`] — Filesystem corpus walking, chunking, embedding, and storage
//! - [`embedding`] — Embedding provider implementations (OpenAI, Ollama, local)
//! - [`provider_router`] — Deterministic chat provider selection
//! - [`chat`] — Prompt assembly and streaming/non-streaming generation
//! - [`trace_sink`] — File-backed JSONL trace sink
//! - [`conversation`] — In-memory conversation history
//! - [`server`] — HTTP surface (Axum)

mod chat;
mod config;
mod conversation;
mod db;
mod embedding;
mod indexer;
mod migrate;
mod provider_router;
mod server;
mod sqlite_store;
mod trace_sink;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use tribrid_core::store::Store;
use tribrid_core::trace::TraceSink;

#[derive(Parser)]
#[command(name = "tribrid", about = "Tri-brid retrieval and fusion engine with provider-routed chat", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/tribrid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Index the configured filesystem corpora
    Index {
        /// Only index this corpus id (default: all configured corpora)
        #[arg(long)]
        corpus_id: Option<String>,
    },

    /// Start the HTTP server
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&app_config).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { corpus_id } => {
            let pool = db::connect(&app_config).await?;
            migrate::run_migrations_on(&pool).await?;
            let store = sqlite_store::SqliteStore::new(pool).await;

            let targets: Vec<_> = app_config
                .corpora
                .iter()
                .filter(|c| corpus_id.as_deref().map(|id| id == c.corpus_id).unwrap_or(true))
                .collect();
            if targets.is_empty() {
                anyhow::bail!("no matching corpora configured");
            }
            for corpus in targets {
                let indexed = indexer::index_corpus(&store, &app_config.snapshot, corpus).await?;
                println!("{}: indexed {} file(s)", corpus.corpus_id, indexed);
            }
        }
        Commands::Serve => {
            let pool = db::connect(&app_config).await?;
            migrate::run_migrations_on(&pool).await?;
            let store: Arc<dyn Store> = Arc::new(sqlite_store::SqliteStore::new(pool).await);
            let trace: Arc<dyn TraceSink> =
                Arc::new(trace_sink::FileTraceSink::new(app_config.trace.dir.clone(), app_config.trace.enabled));
            server::run_server(&app_config, store, trace).await?;
        }
    }

    Ok(())
}
