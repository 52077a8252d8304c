//! # filer CLI
//!
//! ## Usage
//!
//! ```bash
//! filer --config ./filer.toml <command>
//! filer --db /mnt/usb/filedb.db --storage /mnt/usb/storage <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `filer init` | Create the SQLite database and schema |
//! | `filer ingest <path>` | Ingest a file or directory |
//! | `filer search` | Find records by tag and/or source |
//! | `filer list` | List records |
//! | `filer info <hash>` | Show one record as JSON |
//! | `filer locate <hash>` | Show every path the content was seen at |
//! | `filer resolve <hash>` | Print the stored content path |
//! | `filer stats` | Store statistics |
//! | `filer verify` | Audit records against stored content |
//! | `filer serve` | Start the HTTP viewer |
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use filer::config::{self, Config};
use filer::core::query::ListOrder;
use filer::ingest::{IngestStatus, Ingestor};
use filer::progress::ProgressMode;
use filer::sqlite_store::SqliteStore;
use filer::storage::BlobStore;
use filer::{integrity, migrate, query, server, stats};

/// filer: a content-addressable file store with provenance.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, defaults are used (`filedb.db` and
/// `storage/` in the current directory). `--db` and `--storage` override
/// the configured locations for one invocation.
#[derive(Parser)]
#[command(name = "filer", version, about = "Content-addressable file store with provenance")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./filer.toml")]
    config: PathBuf,

    /// SQLite database path, overriding `[db].path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Content storage root, overriding `[storage].root`.
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a file or a directory.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Source label recorded with every location (defaults to `[ingest].default_source`).
        #[arg(long)]
        source: Option<String>,

        /// Descend into subdirectories.
        #[arg(short, long, conflicts_with = "no_recursive")]
        recursive: bool,

        /// Only ingest the top level of a directory.
        #[arg(long)]
        no_recursive: bool,

        /// Extra tag to attach (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Progress on stderr: off, human or json. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<ProgressMode>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Find records by tag substring and/or exact source.
    Search {
        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List all records.
    List {
        /// Sort order: `imported` (oldest first) or `size` (largest first).
        #[arg(long, default_value = "imported")]
        sort: ListOrder,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show a record by full digest or unique prefix.
    Info { hash: String },

    /// Show every location a digest was seen at.
    Locate { hash: String },

    /// Print the stored content path for a digest.
    Resolve { hash: String },

    /// Show store statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Audit records against stored content. Exits non-zero on faults.
    Verify {
        /// Re-hash every stored file.
        #[arg(long)]
        deep: bool,

        #[arg(long)]
        json: bool,
    },

    /// Start the read-only HTTP viewer on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?.with_overrides(cli.db, cli.storage);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            source,
            recursive,
            no_recursive,
            tags,
            progress,
            json,
        } => {
            let source = source.unwrap_or_else(|| cfg.ingest.default_source.clone());
            let recursive = if recursive {
                true
            } else if no_recursive {
                false
            } else {
                cfg.ingest.recursive
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_ingest(&cfg, &path, &source, recursive, &tags, mode, json).await?;
        }
        Commands::Search { tag, source, json } => {
            let store = SqliteStore::open(&cfg).await?;
            query::run_search(&store, tag.as_deref(), source.as_deref(), json).await?;
            store.close().await;
        }
        Commands::List { sort, limit, json } => {
            let store = SqliteStore::open(&cfg).await?;
            query::run_list(&store, sort, limit, json).await?;
            store.close().await;
        }
        Commands::Info { hash } => {
            let store = SqliteStore::open(&cfg).await?;
            query::run_info(&store, &hash).await?;
            store.close().await;
        }
        Commands::Locate { hash } => {
            let store = SqliteStore::open(&cfg).await?;
            query::run_locate(&store, &hash).await?;
            store.close().await;
        }
        Commands::Resolve { hash } => {
            let store = SqliteStore::open(&cfg).await?;
            let blobs = BlobStore::from_config(&cfg.storage);
            query::run_resolve(&store, &blobs, &hash).await?;
            store.close().await;
        }
        Commands::Stats { json } => {
            let store = SqliteStore::open(&cfg).await?;
            stats::run_stats(&cfg, &store, json).await?;
            store.close().await;
        }
        Commands::Verify { deep, json } => {
            let store = SqliteStore::open(&cfg).await?;
            let blobs = BlobStore::from_config(&cfg.storage);
            let result = integrity::run_verify(&store, &blobs, deep, json).await;
            store.close().await;
            result?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    path: &std::path::Path,
    source: &str,
    recursive: bool,
    tags: &[String],
    mode: ProgressMode,
    json: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(cfg).await?);
    let ingestor = Ingestor::new(
        store.clone(),
        BlobStore::from_config(&cfg.storage),
        (&cfg.ingest).into(),
    );

    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot ingest {}", path.display()))?;

    if meta.is_dir() {
        let reporter = mode.reporter();
        let summary = ingestor
            .ingest_directory(path, source, recursive, tags, reporter.as_ref())
            .await?;
        store.close().await;

        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!(
                "Ingested {} files: {} new, {} new locations, {} already recorded, {} failed",
                summary.total(),
                summary.created,
                summary.location_added,
                summary.already_recorded,
                summary.failed_count()
            );
            for item in &summary.failed {
                eprintln!("  failed: {}: {}", item.path.display(), item.reason);
            }
        }
        return Ok(());
    }

    let outcome = ingestor.ingest_file(path, source, tags).await;
    store.close().await;

    if let IngestStatus::Failed(err) = outcome.status {
        return Err(err).with_context(|| format!("failed to ingest {}", outcome.path.display()));
    }

    let digest = outcome
        .digest
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_default();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "path": outcome.path,
                "status": outcome.status.label(),
                "digest": digest,
                "locations": outcome.locations,
            }))?
        );
    } else {
        println!("{}  {}  {}", outcome.status.label(), digest, outcome.path.display());
    }
    Ok(())
}
