//! Memcore CLI — operational access to a memory core database.
//!
//! Usage:
//!   memcore ingest [envelope.json] [--skip-signature] [--db path]
//!   memcore get <domain> <canonical-path> [--db path]
//!   memcore query <text> [--mode hybrid] [--domain d] [-k 8] [--db path]
//!
//! No embedding provider is wired in; hybrid queries degrade to lexical
//! scoring and report `fallbackUsed`.

use clap::{Parser, Subcommand};
use memcore::{
    ApplyOptions, CoreConfig, MemoryCore, NullEmbedder, QueryMode, WriteEnvelope,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "memcore",
    version,
    about = "Shared append-only memory core for multi-writer markdown notes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a write envelope (JSON from a file, or stdin when omitted)
    Ingest {
        /// Envelope JSON file
        file: Option<PathBuf>,
        /// Skip external-signature checking (hash is still enforced)
        #[arg(long)]
        skip_signature: bool,
    },
    /// Read one document with links and backlinks
    Get {
        domain: String,
        canonical_path: String,
    },
    /// List the live note tree for a domain
    Tree {
        domain: String,
        /// Canonical-path prefix filter
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Query the chunk index
    Query {
        text: String,
        /// Retrieval mode: hybrid or lexical
        #[arg(long, default_value = "hybrid")]
        mode: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        /// Result count (1-100)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Emit the link graph
    Graph {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        /// Include ghost nodes and unresolved edges
        #[arg(long, default_value_t = true)]
        include_unresolved: bool,
    },
    /// Poll the sync feed
    Sync {
        /// Last-seen cursor
        #[arg(long, default_value_t = 0)]
        after: i64,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Process pending merge jobs
    Resolve {
        #[arg(long, default_value_t = 25)]
        max_jobs: usize,
    },
    /// Manage writer verification keys
    Signer {
        #[command(subcommand)]
        action: SignerAction,
    },
    /// Row counts per table
    Stats,
}

#[derive(Subcommand)]
enum SignerAction {
    /// Register or replace a writer key (last write wins)
    Add {
        writer_type: String,
        writer_id: String,
        #[arg(long)]
        key_ref: String,
        #[arg(long)]
        address: String,
        /// Hex-encoded ed25519 public key
        #[arg(long)]
        public_key: Option<String>,
    },
    /// Show a registered writer key
    Show {
        writer_type: String,
        writer_id: String,
    },
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memcore")
        .join("memory.db")
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let core = MemoryCore::open(&db_path, Arc::new(NullEmbedder), CoreConfig::default())?;

    match cli.command {
        Commands::Ingest {
            file,
            skip_signature,
        } => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let envelope: WriteEnvelope = serde_json::from_str(&raw)?;
            let outcome = core
                .apply_write_envelope(
                    &envelope,
                    ApplyOptions {
                        skip_signature_check: skip_signature,
                    },
                )
                .await?;
            print_json(&outcome)?;
        }
        Commands::Get {
            domain,
            canonical_path,
        } => match core.get_file(&domain, &canonical_path)? {
            Some(file) => print_json(&file)?,
            None => println!("null"),
        },
        Commands::Tree { domain, prefix } => {
            let view = core.list_tree(&domain, prefix.as_deref())?;
            print_json(&view)?;
        }
        Commands::Query {
            text,
            mode,
            domain,
            prefix,
            k,
        } => {
            let mode = match mode.as_str() {
                "lexical" => QueryMode::Lexical,
                "hybrid" => QueryMode::Hybrid,
                other => return Err(format!("unknown mode {other:?}").into()),
            };
            let response = core
                .query(&text, mode, domain.as_deref(), prefix.as_deref(), k)
                .await?;
            print_json(&response)?;
        }
        Commands::Graph {
            domain,
            prefix,
            include_unresolved,
        } => {
            let view = core.graph(domain.as_deref(), prefix.as_deref(), include_unresolved)?;
            print_json(&view)?;
        }
        Commands::Sync { after, limit } => {
            let batch = core.list_sync_events(after, limit)?;
            print_json(&batch)?;
        }
        Commands::Resolve { max_jobs } => {
            let summary = core.process_pending_merge_jobs(max_jobs).await?;
            print_json(&summary)?;
        }
        Commands::Signer { action } => match action {
            SignerAction::Add {
                writer_type,
                writer_id,
                key_ref,
                address,
                public_key,
            } => {
                core.upsert_signer(
                    &writer_type,
                    &writer_id,
                    &key_ref,
                    &address,
                    public_key.as_deref(),
                    None,
                )?;
                println!("registered {writer_type}/{writer_id}");
            }
            SignerAction::Show {
                writer_type,
                writer_id,
            } => match core.get_signer(&writer_type, &writer_id)? {
                Some(record) => {
                    println!(
                        "{}/{} key_ref={} address={} key={}",
                        record.writer_type,
                        record.writer_id,
                        record.key_ref,
                        record.address,
                        record.public_key.as_deref().unwrap_or("-")
                    );
                }
                None => println!("not registered"),
            },
        },
        Commands::Stats => {
            let stats = core.stats()?;
            print_json(&stats)?;
        }
    }
    Ok(())
}
