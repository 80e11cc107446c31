//! # Research Assistant CLI (`research`)
//!
//! The `research` binary starts the web application and exposes the same
//! pipelines from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! research --config ./config/research.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `research init` | Create the SQLite database and tables |
//! | `research serve` | Start the HTTP server |
//! | `research summarize <URL>...` | Summarize URLs and print the result |
//! | `research feeds add <URL>` | Subscribe to an RSS/Atom feed |
//! | `research feeds refresh` | Poll every active feed |
//! | `research feeds list` | List subscriptions |
//! | `research digest` | Summarize pending feed entries |
//! | `research stats` | Usage report |
//!
//! ## Environment
//!
//! - `GEMINI_API_KEY`: enables summarization.
//! - `SESSION_SECRET`: signs session cookies; `serve` refuses to start without it.
//! - `DATABASE_URL`: optional `sqlite:` path overriding `[db].path`.
//! - `RUST_LOG`: log filter (default `research_assistant=info,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use research_assistant::{aggregate, config, feeds, migrate, server, stats};

/// Research Assistant: summarize web pages, PDFs and RSS feeds with an LLM.
#[derive(Parser)]
#[command(
    name = "research",
    about = "Research Assistant: summarize web pages, PDFs and RSS feeds with an LLM",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/research.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to run
    /// repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Fetch and summarize one or more URLs.
    ///
    /// Runs under the shared `cli` session, so results also show up in
    /// `research stats`.
    Summarize {
        /// URLs to summarize; a missing scheme defaults to https.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Manage RSS/Atom subscriptions.
    Feeds {
        #[command(subcommand)]
        action: FeedsAction,
    },

    /// Summarize pending feed entries into a digest.
    Digest,

    /// Show usage statistics.
    Stats,
}

#[derive(Subcommand)]
enum FeedsAction {
    /// Subscribe to a feed and ingest its latest entries.
    Add {
        /// Feed URL.
        url: String,
    },
    /// Poll every active feed once.
    Refresh,
    /// List subscriptions.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("research_assistant=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Summarize { urls } => {
            aggregate::run_summarize(&cfg, &urls).await?;
        }
        Commands::Feeds { action } => match action {
            FeedsAction::Add { url } => feeds::run_feeds_add(&cfg, &url).await?,
            FeedsAction::Refresh => feeds::run_feeds_refresh(&cfg).await?,
            FeedsAction::List => feeds::run_feeds_list(&cfg).await?,
        },
        Commands::Digest => {
            aggregate::run_digest(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
