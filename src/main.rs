//! # codectx CLI
//!
//! Command-line interface for indexing a codebase and searching it.
//!
//! ```bash
//! codectx index                 # index the current directory
//! codectx index --force         # drop and rebuild the index
//! codectx search "parse config" --limit 5 --ext .rs
//! codectx status                # show indexing status
//! codectx clear                 # drop the index for this directory
//! codectx serve mcp             # start the MCP tool server
//! ```
//!
//! Configuration is read from `./codectx.toml` in the invocation
//! directory (override with `--config`); a missing file falls back to
//! defaults that work offline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use codectx::config::{self, Config};
use codectx::embedding::create_embedder;
use codectx::pipeline::{Indexer, IndexerOptions, SearchRequest};
use codectx::progress::ProgressMode;
use codectx::registry::{CodebaseRegistry, CodebaseStatus, Completion};
use codectx::store::sqlite::SqliteVectorStore;

/// codectx — hybrid semantic code search with incremental re-indexing.
#[derive(Parser)]
#[command(
    name = "codectx",
    about = "Hybrid semantic code search with incremental, content-addressed re-indexing",
    version
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(long, global = true, default_value = "./codectx.toml")]
    config: PathBuf,

    /// Progress output: auto (human on a TTY), off, human, or json.
    #[arg(long, global = true, default_value = "auto")]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Index a codebase (incremental when it is already indexed).
    Index {
        /// Codebase root. Defaults to the current directory.
        path: Option<PathBuf>,

        /// Drop the existing collection and snapshot, then rebuild.
        #[arg(long)]
        force: bool,
    },

    /// Search an indexed codebase.
    Search {
        /// The search query.
        query: String,

        /// Codebase root. Defaults to the current directory.
        path: Option<PathBuf>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict results to these file extensions (repeatable).
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Minimum similarity score (dense collections only).
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Drop the index, snapshot, and registry entry for a codebase.
    Clear {
        /// Codebase root. Defaults to the current directory.
        path: Option<PathBuf>,
    },

    /// Show indexing status.
    Status {
        /// Codebase root. Defaults to the current directory.
        path: Option<PathBuf>,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Start the MCP tool server on the configured bind address.
    Mcp,
}

fn build_indexer(config: &Config) -> anyhow::Result<Arc<Indexer>> {
    let data_dir = config.storage.resolve_data_dir();
    let embedder = create_embedder(&config.embedding)?;
    let store = Arc::new(SqliteVectorStore::new(&data_dir.join("collections")));
    let registry = Arc::new(CodebaseRegistry::load(&data_dir.join("registry.json")));
    Ok(Arc::new(Indexer::new(
        embedder,
        store,
        registry,
        IndexerOptions::from_config(config),
    )))
}

fn resolve_root(path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let indexer = build_indexer(&config)?;
    let reporter = cli.progress.mode().reporter();

    match cli.command {
        Commands::Index { path, force } => {
            let root = resolve_root(path)?;
            let stats = indexer.index(&root, force, reporter.as_ref()).await?;
            println!("index {}", root.display());
            println!("  files: {}", stats.files);
            println!("  chunks: {}", stats.chunks);
            if stats.completion == Completion::LimitReached {
                println!("  note: chunk limit reached; index is partial");
            }
            println!("ok");
        }
        Commands::Search {
            query,
            path,
            limit,
            extensions,
            threshold,
        } => {
            let root = resolve_root(path)?;
            let request = SearchRequest {
                query,
                limit: limit.unwrap_or(config.search.limit),
                threshold: threshold.or(config.search.threshold),
                extensions: (!extensions.is_empty()).then_some(extensions),
            };
            let outcome = indexer.search(&root, &request).await?;

            if outcome.indexing_in_progress {
                eprintln!("note: indexing is still in progress; results may be partial");
            }
            if outcome.results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in outcome.results.iter().enumerate() {
                    println!(
                        "{}. [{:.4}] {}:{}-{} ({})",
                        i + 1,
                        result.score,
                        result.relative_path,
                        result.start_line,
                        result.end_line,
                        result.language
                    );
                    for line in result.content.lines().take(6) {
                        println!("    {}", line);
                    }
                    println!();
                }
            }
        }
        Commands::Clear { path } => {
            let root = resolve_root(path)?;
            indexer.clear_index(&root).await?;
            println!("cleared {}", root.display());
        }
        Commands::Status { path } => {
            let root = resolve_root(path)?;
            indexer.reconcile_registry().await?;
            let (status, has_collection) = indexer.status(&root).await?;
            println!("status {}", root.display());
            match status {
                Some(CodebaseStatus::Indexing { progress, .. }) => {
                    println!("  indexing ({}%)", progress);
                }
                Some(CodebaseStatus::Indexed {
                    files,
                    chunks,
                    completion,
                    ..
                }) => {
                    println!("  indexed: {} files, {} chunks", files, chunks);
                    if completion == Completion::LimitReached {
                        println!("  note: chunk limit reached; index is partial");
                    }
                }
                Some(CodebaseStatus::Failed { message, .. }) => {
                    println!("  failed: {}", message);
                    println!("  hint: run `codectx index --force` to retry");
                }
                None if has_collection => {
                    println!("  collection exists but is not registered");
                }
                None => {
                    println!("  not indexed");
                    println!("  hint: run `codectx index` first");
                }
            }
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                indexer.reconcile_registry().await?;
                codectx::server::run_server(indexer, &config.server.bind).await?;
            }
        },
    }

    Ok(())
}
