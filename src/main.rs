//! # grist CLI
//!
//! The `grist` binary is a thin local driver over the pipeline's two
//! exposed operations, plus upload and inspection helpers.
//!
//! ## Usage
//!
//! ```bash
//! grist --config ./config/grist.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grist init` | Create the SQLite database and run schema migrations |
//! | `grist add <project> <file>` | Store a file and create its document record |
//! | `grist process <project> <file-id>` | Chunk, embed, and index a document |
//! | `grist ask <project> "<question>"` | Answer a question with citations |
//! | `grist status <project> [file-id]` | Inspect document processing state |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use grist::blob::FsBlobStore;
use grist::config::{self, Config};
use grist::error::Error;
use grist::pipeline::Pipeline;
use grist::store::SqliteStore;
use grist::{composer, db, embedding, migrate};

/// grist — a retrieval-augmented generation core.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file.
#[derive(Parser)]
#[command(
    name = "grist",
    about = "grist — document ingestion, vector retrieval, and grounded answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grist.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Store a file and create its document record.
    ///
    /// Prints the new document id; use it with `process`.
    Add {
        /// Project namespace (created on first upload).
        project: String,
        /// Path to the file to ingest.
        file: PathBuf,
    },

    /// Process an uploaded document into indexed chunks.
    Process {
        /// Project namespace.
        project: String,
        /// Document id returned by `add`.
        file_id: String,

        /// Maximum characters per chunk.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared between consecutive chunks.
        #[arg(long)]
        overlap_size: Option<usize>,

        /// Discard prior chunks and reprocess from scratch.
        #[arg(long)]
        reset: bool,
    },

    /// Answer a question from a project's indexed documents.
    Ask {
        /// Project namespace.
        project: String,
        /// The question to answer.
        question: String,

        /// Number of chunks to retrieve.
        #[arg(short)]
        k: Option<usize>,

        /// Minimum similarity score in [-1.0, 1.0].
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Inspect document processing state.
    Status {
        /// Project namespace.
        project: String,
        /// Document id; omit to list all documents.
        file_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.storage.db_path).await?;
            migrate::run_migrations(&pool).await?;
            println!("initialized {}", config.storage.db_path.display());
            Ok(())
        }
        Commands::Add { project, file } => {
            let pipeline = build_pipeline(&config).await?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("File has no usable name")?;

            let doc = pipeline.upload(&project, filename, &bytes).await?;
            println!("added {} as {}", filename, doc.id);
            Ok(())
        }
        Commands::Process {
            project,
            file_id,
            chunk_size,
            overlap_size,
            reset,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let outcome = pipeline
                .process(
                    &project,
                    &file_id,
                    chunk_size.unwrap_or(config.chunking.chunk_size),
                    overlap_size.unwrap_or(config.chunking.overlap_size),
                    reset,
                )
                .await?;
            println!("process {}", file_id);
            println!("  state: {}", outcome.state.as_str());
            println!("  chunks: {}", outcome.chunk_count);
            if outcome.segments_skipped > 0 {
                println!("  segments skipped: {}", outcome.segments_skipped);
            }
            Ok(())
        }
        Commands::Ask {
            project,
            question,
            k,
            min_score,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let result = pipeline
                .answer(
                    &project,
                    &question,
                    k.unwrap_or(config.retrieval.default_k),
                    min_score.unwrap_or(config.retrieval.min_score),
                )
                .await;

            match result {
                Ok(answer) => {
                    println!("{}", answer.text);
                    println!();
                    println!("citations: {}", answer.citations.join(", "));
                    Ok(())
                }
                Err(Error::EmptyContext) => {
                    println!("no relevant information found");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Status { project, file_id } => {
            let pipeline = build_pipeline(&config).await?;
            match file_id {
                Some(id) => {
                    let doc = pipeline.status(&project, &id).await?;
                    println!("{} ({})", doc.id, doc.filename);
                    println!("  state: {}", doc.state.as_str());
                    println!("  chunks: {}", doc.chunk_count);
                    if let (Some(size), Some(overlap)) = (doc.chunk_size, doc.overlap_size) {
                        println!("  chunk_size: {} overlap_size: {}", size, overlap);
                    }
                    if let Some(err) = &doc.error {
                        println!("  error: {}", err);
                    }
                }
                None => {
                    for doc in pipeline.list_documents(&project).await? {
                        println!(
                            "{}  {}  {}  {} chunks",
                            doc.id,
                            doc.state.as_str(),
                            doc.filename,
                            doc.chunk_count
                        );
                    }
                }
            }
            Ok(())
        }
    }
}

async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let pool = db::connect(&config.storage.db_path).await?;
    migrate::run_migrations(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let blobs = Arc::new(FsBlobStore::new(config.storage.blob_root.clone())?);
    let embedding_backend = embedding::create_backend(&config.embedding)?;
    let generation_backend = composer::create_backend(&config.generation)?;

    let pipeline = Pipeline::new(config, store, blobs, embedding_backend, generation_backend)?;
    pipeline.rehydrate().await?;
    Ok(pipeline)
}
