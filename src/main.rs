//! # RAG gateway CLI (`ragd`)
//!
//! ## Usage
//!
//! ```bash
//! ragd --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragd serve` | Start the HTTP API |
//! | `ragd query "<text>"` | Run one retrieval (or `--rag` answer) and print JSON |
//! | `ragd check-config` | Validate configuration and print it with secrets redacted |
//!
//! A `.env` file in the working directory is loaded before configuration,
//! so credentials can live there during development.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use rag_gateway::config::{self, Config};
use rag_gateway::logging;
use rag_gateway::models::QueryResponse;
use rag_gateway::rag::build_pipeline;
use rag_gateway::server;

/// Retrieval-augmented generation gateway over a hosted knowledge base.
#[derive(Parser)]
#[command(name = "ragd", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults plus
    /// environment.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind` (or `PORT`).
    Serve,

    /// Run a single query against the configured backend.
    Query {
        /// Free-text query.
        query: String,

        /// Number of documents to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Also generate an answer from the retrieved documents.
        #[arg(long)]
        rag: bool,
    },

    /// Validate configuration and print it with secrets redacted.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Query { query, top_k, rag } => {
            run_query(&cfg, &query, top_k, rag).await?;
        }
        Commands::CheckConfig => {
            println!("{:#?}", cfg);
            info!(backend = cfg.retrieval.backend.as_str(), "configuration is valid");
        }
    }

    Ok(())
}

async fn run_query(cfg: &Config, query: &str, top_k: Option<usize>, rag: bool) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    if top_k == Some(0) {
        anyhow::bail!("--top-k must be >= 1");
    }

    let pipeline = build_pipeline(cfg)?;
    let response = if rag {
        let result = pipeline.answer(query, top_k).await?;
        QueryResponse::new(result.documents, Some(result.answer))
    } else {
        QueryResponse::new(pipeline.retrieve(query, top_k).await?, None)
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
