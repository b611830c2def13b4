//! # context-rag CLI (`crag`)
//!
//! The `crag` binary is the primary interface for context-rag. It exposes
//! branch-aware indexing, similarity search, cache status inspection, and
//! branch lifecycle operations over the library.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag index` | Index the current (or named) branch |
//! | `crag search "<query>"` | Run a similarity query with optional filters |
//! | `crag status` | Show cache presence and freshness for a branch |
//! | `crag branches` | List every branch with a cache on disk |
//! | `crag branch switch\|merge\|create` | Apply a branch lifecycle event |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use context_rag::branch::{BranchCacheManager, BranchOperation};
use context_rag::config::{load_config, Config};
use context_rag::discovery::ContextDiscovery;
use context_rag::embedding::create_embedder;
use context_rag::git::GitInfo;
use context_rag::indexer::Indexer;
use context_rag::search::{QueryFilters, RetrievalEngine, SearchOptions};
use context_rag::store::CacheStore;

/// The context-rag CLI: a branch-aware semantic retrieval cache for source
/// trees.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Branch-aware semantic retrieval cache for source trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./crag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the relevant file set into a branch cache.
    ///
    /// Discovers context files, chunks and embeds them, and writes the
    /// branch cache plus fresh freshness metadata. Defaults to the current
    /// git branch (or the trunk branch outside a repository).
    Index {
        /// Branch to index instead of the current one.
        #[arg(long)]
        branch: Option<String>,
    },

    /// Run a similarity query against the effective branch cache.
    ///
    /// Feature branches query a merged view over the trunk baseline plus
    /// their own cache; trunk queries load the branch cache directly.
    Search {
        /// The query string.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Similarity cutoff override (defaults per embedder fidelity).
        #[arg(long)]
        threshold: Option<f32>,

        /// Exact-match filter on file metadata `feature`.
        #[arg(long)]
        feature: Option<String>,

        /// Exact-match filter on file metadata `type`.
        #[arg(long = "type")]
        doc_type: Option<String>,

        /// Tag filter; repeatable, matches files with any of the tags.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show cache presence and freshness for a branch.
    Status {
        /// Branch to inspect instead of the current one.
        #[arg(long)]
        branch: Option<String>,
    },

    /// List every branch with a cache on disk.
    Branches,

    /// Apply a branch lifecycle event to the cache.
    Branch {
        #[command(subcommand)]
        op: BranchCommand,
    },
}

/// Branch lifecycle subcommands.
#[derive(Subcommand)]
enum BranchCommand {
    /// Record a branch switch: removes the abandoned branch's cache and
    /// rebuilds the target's metadata when stale.
    Switch {
        /// Branch switched away from.
        #[arg(long)]
        from: Option<String>,
        /// Branch switched to.
        #[arg(long)]
        to: String,
    },
    /// Record a merge: unconditionally rebuilds the target's metadata.
    Merge {
        #[arg(long)]
        target: String,
        #[arg(long)]
        source: String,
    },
    /// Record a branch creation; the cache is built lazily.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let root = std::env::current_dir().context("cannot determine working directory")?;

    match cli.command {
        Commands::Index { branch } => run_index(&config, &root, branch).await,
        Commands::Search {
            query,
            top_k,
            threshold,
            feature,
            doc_type,
            tags,
        } => {
            let options = SearchOptions {
                top_k,
                threshold,
                filters: QueryFilters {
                    feature,
                    doc_type,
                    tags,
                },
            };
            run_search(config, &root, &query, &options).await
        }
        Commands::Status { branch } => run_status(&config, &root, branch),
        Commands::Branches => run_branches(&config, &root),
        Commands::Branch { op } => run_branch_op(&config, &root, op),
    }
}

fn store_for(config: &Config) -> CacheStore {
    CacheStore::new(&config.cache.dir, &config.cache.metadata_dir)
}

fn resolve_branch(config: &Config, root: &Path, requested: Option<String>) -> String {
    if let Some(branch) = requested {
        return branch;
    }
    match GitInfo::new(root).current_branch() {
        Ok(Some(branch)) => branch,
        _ => config.cache.trunk().to_string(),
    }
}

async fn run_index(config: &Config, root: &Path, branch: Option<String>) -> Result<()> {
    let branch = resolve_branch(config, root, branch);

    let indexer = Indexer::new(
        store_for(config),
        discovery_for(config, root),
        config.embedding.batch_size,
    );
    let embedder = create_embedder(&config.embedding)?;

    let report = indexer.index_branch(&branch, embedder.as_ref()).await?;
    if report.indexed_files == 0 {
        println!("nothing to index for '{}'", report.branch);
    } else {
        println!(
            "indexed {} files into {} chunks for '{}' ({} skipped)",
            report.indexed_files, report.total_chunks, report.branch, report.skipped_files
        );
    }
    Ok(())
}

async fn run_search(
    config: Config,
    root: &Path,
    query: &str,
    options: &SearchOptions,
) -> Result<()> {
    let engine = RetrievalEngine::from_config(config, root)?;
    let results = engine.search(query, options).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let score = result
            .priority_score
            .map(|p| format!("ext:{:.0}", p))
            .unwrap_or_else(|| format!("{:.3}", result.similarity));
        let marker = if result.is_context { "*" } else { " " };

        println!(
            "{}.{} [{}] {}#{}",
            i + 1,
            marker,
            score,
            result.file_path,
            result.chunk_index
        );
        if let Some(branch) = &result.source_branch {
            println!("     branch: {}", branch);
        }
        println!("     \"{}\"", result.snippet.replace('\n', " "));
        println!();
    }
    Ok(())
}

fn run_status(config: &Config, root: &Path, branch: Option<String>) -> Result<()> {
    let branch = resolve_branch(config, root, branch);
    let manager = manager_for(config, root);
    let status = manager.cache_status(&branch)?;

    println!("branch:   {}", status.branch);
    println!("exists:   {}", status.exists);
    println!("fresh:    {}", status.fresh);
    println!("size:     {} bytes", status.size_bytes);
    if let Some(modified) = status.modified {
        println!("modified: {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

fn run_branches(config: &Config, root: &Path) -> Result<()> {
    let branches = manager_for(config, root).list_cached_branches();

    if branches.is_empty() {
        println!("No cached branches.");
        return Ok(());
    }

    for summary in branches {
        let files = summary
            .indexed_file_count
            .map(|n| format!("{} files", n))
            .unwrap_or_else(|| "? files".to_string());
        println!("{}  ({} bytes, {})", summary.branch, summary.size_bytes, files);
    }
    Ok(())
}

fn run_branch_op(config: &Config, root: &Path, op: BranchCommand) -> Result<()> {
    let operation = match op {
        BranchCommand::Switch { from, to } => BranchOperation::Switch { from, to },
        BranchCommand::Merge { target, source } => BranchOperation::Merge { target, source },
        BranchCommand::Create { name, base } => BranchOperation::Create {
            branch_name: name,
            base_branch: base,
        },
    };

    let result = manager_for(config, root).handle_branch_operation(&operation)?;

    print!("{} '{}': ", result.operation, result.branch);
    if result.rebuilt {
        print!("rebuilt");
    } else {
        print!("no rebuild");
    }
    if let Some(removed) = result.removed_branch {
        print!(", removed cache for '{}'", removed);
    }
    println!();
    Ok(())
}

fn discovery_for(config: &Config, root: &Path) -> ContextDiscovery {
    let mut discovery_config = config.discovery.clone();
    if discovery_config.root == PathBuf::from(".") {
        discovery_config.root = root.to_path_buf();
    }
    ContextDiscovery::new(discovery_config)
}

fn manager_for(config: &Config, root: &Path) -> BranchCacheManager {
    BranchCacheManager::new(
        store_for(config),
        discovery_for(config, root),
        config.cache.clone(),
    )
}
