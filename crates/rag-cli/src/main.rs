//! rag - Command-line interface for the hybrid retrieval engine.

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rag_core::{Chunk, RagConfig, RetrievalConfig, SearchOutcome, SearchResults, META_SOURCE_PATH};
use rag_providers::{HttpEmbedder, HttpReranker};
use rag_query::{Backends, RetrievalEngine};
use rag_store::SqliteStore;

type CliResult<T> = std::result::Result<T, Box<dyn Error>>;

/// rag - Hybrid semantic + lexical retrieval over indexed chunks
#[derive(Parser)]
#[command(name = "rag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: user config dir, then ./rag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load pre-chunked records from a JSONL file
    Index {
        /// JSONL file with one {id, text, metadata?, embedding?} per line
        path: PathBuf,
    },

    /// Search indexed chunks
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a query is classified and which settings it resolves to
    Analyze {
        /// Query to analyze
        query: String,
    },

    /// Print the active configuration
    Config,

    /// Show index statistics
    Stats,
}

/// One line of an index file.
#[derive(Debug, Deserialize)]
struct ChunkRecord {
    id: String,
    text: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>, database: Option<PathBuf>) -> CliResult<RagConfig> {
    let mut config = match path {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };
    if let Some(database) = database {
        config.database.path = database;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref(), cli.database)?;

    match cli.command {
        Commands::Index { path } => {
            let store = SqliteStore::open(&config.database.path)?;
            index(&store, &path)?;
        }
        Commands::Search { query, top_k, json } => {
            if let Some(k) = top_k {
                override_top_k(&mut config, k);
            }
            let engine = build_engine(config)?;
            let outcome = engine.search(&query).await;
            print_outcome(&outcome, json)?;
        }
        Commands::Analyze { query } => {
            let engine = build_engine(config)?;
            let (intent, resolved) = engine.resolve(&query);
            print_analysis(&intent, &resolved)?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Stats => {
            let store = SqliteStore::open(&config.database.path)?;
            let (chunks, embeddings) = store.counts()?;
            println!("Database:   {}", config.database.path.display());
            println!("Chunks:     {}", chunks);
            println!("Embeddings: {}", embeddings);
        }
    }

    Ok(())
}

/// Apply `-k` to whichever cut is in force.
fn override_top_k(config: &mut RagConfig, k: usize) {
    let retrieval = &mut config.retrieval;
    retrieval.top_k = k;
    if retrieval.reranking_enabled {
        retrieval.rerank_top_k_final = k;
        retrieval.rerank_top_k_initial = retrieval.rerank_top_k_initial.max(k);
    }
}

fn build_engine(config: RagConfig) -> CliResult<RetrievalEngine> {
    let store = Arc::new(SqliteStore::open(&config.database.path)?);
    let mut backends = Backends::from_store(store);

    if let Some(provider) = &config.providers.embedding {
        debug!("Using embedding service at {}", provider.api_base);
        backends = backends.with_embedder(Arc::new(HttpEmbedder::new(provider.clone())?));
    }
    if let Some(provider) = &config.providers.rerank {
        debug!("Using rerank service at {}", provider.api_base);
        backends = backends.with_reranker(Arc::new(HttpReranker::new(provider.clone())?));
    }

    Ok(RetrievalEngine::new(config, backends)?)
}

fn parse_records(content: &str) -> CliResult<Vec<(Chunk, Option<Vec<f32>>)>> {
    let mut records = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {}: {}", line_no + 1, e))?;
        let chunk = Chunk {
            id: record.id,
            text: record.text,
            metadata: record.metadata,
        };
        records.push((chunk, record.embedding));
    }

    Ok(records)
}

fn index(store: &SqliteStore, path: &Path) -> CliResult<()> {
    let content = fs::read_to_string(path)?;
    let records = parse_records(&content)?;

    if records.is_empty() {
        println!("No records found in: {}", path.display());
        return Ok(());
    }

    let embedded = records.iter().filter(|(_, e)| e.is_some()).count();
    store.insert_chunks(&records)?;

    info!("Indexed {} chunks from {}", records.len(), path.display());
    println!(
        "Indexed {} chunk(s), {} with embeddings",
        records.len(),
        embedded
    );
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        SearchOutcome::Ranked(results) => {
            print!("{}", format_results(results));
            Ok(())
        }
        SearchOutcome::CannotRetrieve { code, reason, .. } => {
            eprintln!("Error [{}]: {}", code, reason);
            std::process::exit(1);
        }
    }
}

fn format_results(results: &SearchResults) -> String {
    let mut out = format!(
        "{} result(s) for {:?} ({} query, {}ms)\n",
        results.total_results, results.query, results.intent, results.latency_ms
    );

    if !results.degraded.is_empty() {
        let modes: Vec<String> = results
            .degraded
            .iter()
            .filter_map(|m| serde_json::to_value(m).ok())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        out.push_str(&format!("degraded: {}\n", modes.join(", ")));
    }

    for result in &results.results {
        let source = result
            .metadata
            .get(META_SOURCE_PATH)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        out.push_str(&format!(
            "\n{}. [{:.3}] {} ({})\n",
            result.rank, result.final_score, result.chunk_id, source
        ));

        let breakdown = &result.score_breakdown;
        let fmt_opt = |v: Option<f32>| v.map_or("-".to_string(), |s| format!("{:.3}", s));
        out.push_str(&format!(
            "   semantic {}  lexical {}  merged {:.3}",
            fmt_opt(breakdown.semantic),
            fmt_opt(breakdown.lexical),
            breakdown.merged
        ));
        if let Some(rerank) = breakdown.rerank {
            out.push_str(&format!("  rerank {:.3}", rerank));
        }
        out.push('\n');

        if !breakdown.boosts.is_empty() {
            let boosts: Vec<String> = breakdown
                .boosts
                .iter()
                .map(|b| match &b.matched {
                    Some(m) => format!("{} +{:.2} ({})", b.signal.as_str(), b.amount, m),
                    None => format!("{} +{:.2}", b.signal.as_str(), b.amount),
                })
                .collect();
            out.push_str(&format!("   boosts: {}\n", boosts.join(", ")));
        }

        out.push_str(&format!("   {}\n", snippet(&result.text, 160)));
    }

    out
}

/// First `max_chars` characters of the text on one line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

fn print_analysis(intent: &rag_core::QueryIntent, resolved: &RetrievalConfig) -> CliResult<()> {
    let report = serde_json::json!({
        "intent": intent,
        "retrieval": resolved,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
