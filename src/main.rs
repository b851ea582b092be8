//! # Syndex CLI (`syndex`)
//!
//! The `syndex` binary ingests feeds, lists sources, runs semantic
//! queries, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! syndex --config ./syndex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `syndex ingest <url>...` | Fetch, embed, and shard one or more feeds |
//! | `syndex sources` | List committed shards |
//! | `syndex search "<query>"` | Semantic query over all shards |
//! | `syndex serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest two feeds, capping each at 50 articles
//! syndex ingest https://example.com/rss https://other.org/atom.xml --max-articles 50
//!
//! # Query one source only
//! syndex search "rust async runtimes" --source https://example.com/rss
//!
//! # Start the HTTP server on the configured bind address
//! syndex serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use syndex::{config, ingest, retrieval, server, sources};

/// Syndex CLI for feed ingestion and semantic retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/syndex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "syndex",
    about = "Feed ingestion, embedding, and semantic retrieval over versioned shards",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./syndex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more feeds into new shard generations.
    ///
    /// Each feed is processed independently; a failing feed is reported
    /// and does not abort the rest of the batch.
    Ingest {
        /// Feed URLs to ingest.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Cap the number of entries taken from each feed.
        #[arg(long)]
        max_articles: Option<usize>,
    },

    /// Semantic query over committed shards.
    Search {
        /// The search query string.
        query: String,

        /// Restrict candidates to shards of this feed URL.
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of results (defaults to retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List committed shards and their sources.
    Sources,

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `/search`, `/ingest`, `/sources`, and `/health`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { urls, max_articles } => {
            ingest::run_ingest(&cfg, &urls, max_articles).await?;
        }
        Commands::Search {
            query,
            source,
            top_k,
        } => {
            retrieval::run_search(&cfg, &query, top_k, source.as_deref()).await?;
        }
        Commands::Sources => {
            sources::run_sources(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
