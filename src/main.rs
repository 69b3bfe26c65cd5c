//! # Concierge CLI (`concierge`)
//!
//! ## Usage
//!
//! ```bash
//! concierge --config ./config/concierge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `concierge init` | Create the SQLite database and run schema migrations |
//! | `concierge seed-rooms <file>` | Upsert rooms and blocked dates from a TOML file |
//! | `concierge ingest [--path <file>]` | Ingest one file, or the configured knowledge directory |
//! | `concierge delete-document <id>` | Remove a document and its chunks |
//! | `concierge ask "<message>"` | Run one dialogue turn and print the reply |
//! | `concierge search "<query>"` | Show what retrieval returns for a query |
//! | `concierge serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use villa_concierge::app::App;
use villa_concierge::config::{self, Config};
use villa_concierge::{migrate, seed, server};

/// Villa Limone concierge: retrieval-augmented chat with room booking.
#[derive(Parser)]
#[command(name = "concierge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/concierge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upsert rooms (and blocked dates) from a TOML seed file.
    SeedRooms {
        file: PathBuf,
    },

    /// Ingest knowledge documents.
    ///
    /// Without `--path`, walks `[knowledge].root` with its include and
    /// exclude globs. Re-ingesting unchanged content regenerates the
    /// chunks of the existing document.
    Ingest {
        /// A single file to ingest.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Document name for `--path` (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a knowledge document and its chunks.
    DeleteDocument {
        id: String,
    },

    /// Send one guest message and print the reply.
    Ask {
        message: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,
    },

    /// Run the retrieval pipeline and print the ranked chunks.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("villa_concierge=info,concierge_core=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::SeedRooms { file } => {
            let app = App::open(cfg).await?;
            let report = seed::seed_rooms(&app.catalog, &file).await?;
            println!(
                "Seeded {} room(s), {} blocked date(s).",
                report.rooms, report.blocked_dates
            );
        }
        Commands::Ingest { path, name } => run_ingest(cfg, path, name).await?,
        Commands::DeleteDocument { id } => {
            let app = App::open(cfg).await?;
            if app.ingestor().delete_document(&id).await? {
                println!("Deleted document {}", id);
            } else {
                bail!("No document with id {}", id);
            }
        }
        Commands::Ask { message, session } => {
            let app = App::open(cfg).await?;
            let reply = app
                .orchestrator
                .handle_message(session.as_deref(), &message)
                .await?;
            println!("{}", reply.message);
            eprintln!("session: {}", reply.session_id);
            if !reply.tool_calls.is_empty() {
                eprintln!("tools: {}", reply.tool_calls.join(", "));
            }
        }
        Commands::Search { query, limit } => run_search(cfg, &query, limit).await?,
        Commands::Serve => {
            let app = App::open(cfg).await?;
            server::run_server(&app).await?;
        }
    }

    Ok(())
}

async fn run_ingest(cfg: Config, path: Option<PathBuf>, name: Option<String>) -> Result<()> {
    let app = App::open(cfg).await?;
    let ingestor = app.ingestor();

    let reports = match path {
        Some(path) => {
            let name = match name {
                Some(n) => n,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string()),
            };
            vec![ingestor.ingest_file(&path, &name).await?]
        }
        None => {
            let Some(knowledge) = &app.config.knowledge else {
                bail!("No [knowledge] section in config; pass --path to ingest a single file");
            };
            ingestor.ingest_directory(knowledge).await?
        }
    };

    for r in &reports {
        let verb = if r.updated { "updated" } else { "created" };
        println!("{} {} ({} chunks) {}", verb, r.name, r.chunks, r.document_id);
    }
    println!("{} document(s) ingested.", reports.len());
    Ok(())
}

async fn run_search(cfg: Config, query: &str, limit: Option<usize>) -> Result<()> {
    let app = App::open(cfg).await?;
    let Some(retrieval) = &app.retrieval else {
        bail!("Search requires an embedding provider. Set [embedding] provider in config.");
    };

    let mut options = app.config.retrieval.search_options();
    if let Some(limit) = limit {
        options.limit = limit;
    }

    let results = retrieval.retrieve(query, &options).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.3} | sim {:.3}] {} #{}",
            i + 1,
            r.score,
            r.similarity,
            r.chunk.source_name,
            r.chunk.chunk_index
        );
        let snippet: String = r.chunk.content.chars().take(200).collect();
        println!("    {}", snippet.replace('\n', " "));
    }
    Ok(())
}
