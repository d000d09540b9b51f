//! tgraph CLI - main entry point
//!
//! Ingests transcripts, chat exports and documents into the knowledge graph
//! and runs retrieval queries against it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transcript_graph::embeddings::EmbedBackend;
use transcript_graph::extraction::{provider_from_config, Extractor, InMemoryEntityStore};
use transcript_graph::graph::{ChunkHit, GraphReader, GraphSink, OutcomeHit, VectorIndex};
use transcript_graph::ingest::{discover, load_source, RunSummary};
use transcript_graph::{
    metrics, ChunkType, Config, GraphLoader, IngestPipeline, MySqlSink, Neo4jGraph, Poller,
    RetrievalEngine, RunGuard, Segmenter,
};

#[derive(Parser)]
#[command(name = "tgraph")]
#[command(about = "Transcript knowledge graph: ingestion and retrieval", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults to ./config.yml, then ../config.yml)
    #[arg(long, global = true, env = "TGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create constraints, indexes and tables on every sink
    Schema,

    /// Ingest every new source in a directory
    Ingest {
        /// Source directory (defaults to ingestion.input_dir)
        dir: Option<PathBuf>,

        /// Reprocess sources already recorded in the state file
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Parse and extract only, print what would be loaded
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Ingest on a fixed interval until interrupted
    Poll {
        /// Source directory (defaults to ingestion.input_dir)
        dir: Option<PathBuf>,
    },

    /// Chunks mentioning an entity
    Entity {
        name: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Full-text search over chunk text
    Search {
        query: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// A chunk with its neighbours
    Expand {
        chunk_id: String,

        #[arg(long, default_value = "2")]
        before: usize,

        #[arg(long, default_value = "2")]
        after: usize,
    },

    /// Decisions and actions matching a keyword, with provenance
    Outcomes {
        keyword: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// How discussion of an entity evolved over time
    Evolution {
        entity: String,

        /// decision | action_assignment | assessment | question | discussion
        #[arg(long)]
        chunk_type: Option<ChunkType>,
    },

    /// Assemble a ranked context block for a question
    Context {
        query: String,

        /// Seed entity names (repeatable); derived from the query when absent
        #[arg(short, long = "entity")]
        entities: Vec<String>,

        /// Maximum chunks in the block
        #[arg(long)]
        max: Option<usize>,
    },

    /// Node and relationship counts per sink
    Stats,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Schema => "schema",
            Commands::Ingest { .. } => "ingest",
            Commands::Poll { .. } => "poll",
            Commands::Entity { .. } => "entity",
            Commands::Search { .. } => "search",
            Commands::Expand { .. } => "expand",
            Commands::Outcomes { .. } => "outcomes",
            Commands::Evolution { .. } => "evolution",
            Commands::Context { .. } => "context",
            Commands::Stats => "stats",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("transcript_graph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::new(),
    };

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(cli.command, config, cli.json).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

/// Connected stores, built once per command.
struct Stores {
    neo4j: Arc<Neo4jGraph>,
    mysql: Option<Arc<MySqlSink>>,
}

impl Stores {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        let neo4j = Arc::new(
            Neo4jGraph::connect(&config.neo4j)
                .await
                .context("connecting to Neo4j")?,
        );
        let mysql = config
            .mysql
            .enabled
            .then(|| Arc::new(MySqlSink::connect(&config.mysql)));
        Ok(Self { neo4j, mysql })
    }

    fn sinks(&self) -> Vec<Arc<dyn GraphSink>> {
        let mut sinks: Vec<Arc<dyn GraphSink>> = vec![self.neo4j.clone() as Arc<dyn GraphSink>];
        if let Some(mysql) = &self.mysql {
            sinks.push(mysql.clone());
        }
        sinks
    }

    fn retrieval(&self, config: &Config) -> RetrievalEngine {
        let reader: Arc<dyn GraphReader> = self.neo4j.clone();
        let engine = RetrievalEngine::new(reader, config.retrieval.clone());
        match &self.mysql {
            Some(mysql) => engine.with_vectors(mysql.clone() as Arc<dyn VectorIndex>),
            None => engine,
        }
    }
}

fn build_pipeline(config: &Config, sinks: Vec<Arc<dyn GraphSink>>) -> anyhow::Result<IngestPipeline> {
    let provider = provider_from_config(&config.extraction)?;
    let extractor = Extractor::new(
        provider,
        Arc::new(InMemoryEntityStore::new()),
        config.extraction.outcome_top_n,
    );
    let loader = GraphLoader::new(sinks, &config.loader);
    let pipeline = IngestPipeline::new(Segmenter::new(&config.segmentation), extractor, loader);

    if config.embedding.enabled {
        let embedder = EmbedBackend::from_config(&config.embedding)?;
        info!(
            provider = %config.embedding.provider,
            dimension = embedder.dimension(),
            "Chunk embeddings enabled"
        );
        return Ok(pipeline.with_embedder(embedder));
    }
    Ok(pipeline)
}

async fn execute_command(command: Commands, config: Config, json: bool) -> anyhow::Result<()> {
    let limit_or_default = |limit: Option<usize>| limit.unwrap_or(config.retrieval.default_limit);

    match command {
        Commands::Schema => {
            let stores = Stores::connect(&config).await?;
            GraphLoader::new(stores.sinks(), &config.loader)
                .create_schema()
                .await?;
            println!("✅ Schema ready");
        }
        Commands::Ingest {
            dir,
            force,
            dry_run,
        } => {
            let dir = dir.unwrap_or_else(|| config.ingestion.input_dir.clone());
            if dry_run {
                return dry_run_ingest(&config, &dir, json).await;
            }

            let _guard = RunGuard::acquire(&config.ingestion.lock_file)?;
            let stores = Stores::connect(&config).await?;
            let pipeline = build_pipeline(&config, stores.sinks())?;
            let summary = pipeline
                .run_dir(&dir, &config.ingestion.state_file, force)
                .await?;
            print_summary(&summary, json)?;
        }
        Commands::Poll { dir } => {
            let stores = Stores::connect(&config).await?;
            let pipeline = Arc::new(build_pipeline(&config, stores.sinks())?);
            let mut poller = Poller::new(pipeline, &config.ingestion);
            if let Some(dir) = dir {
                poller = poller.with_input_dir(dir);
            }

            // Handle Ctrl+C gracefully
            tokio::select! {
                result = poller.run() => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\n👋 Poller stopped by user");
                }
            }
        }
        Commands::Entity { name, limit } => {
            let engine = Stores::connect(&config).await?.retrieval(&config);
            let hits = engine.entity_chunks(&name, limit_or_default(limit)).await?;
            print_hits(&hits, json)?;
        }
        Commands::Search { query, limit } => {
            let engine = Stores::connect(&config).await?.retrieval(&config);
            let hits = engine.full_text(&query, limit_or_default(limit)).await?;
            print_hits(&hits, json)?;
        }
        Commands::Expand {
            chunk_id,
            before,
            after,
        } => {
            let engine = Stores::connect(&config).await?.retrieval(&config);
            let hits = engine.expand(&chunk_id, before, after).await?;
            print_hits(&hits, json)?;
        }
        Commands::Outcomes { keyword, limit } => {
            let engine = Stores::connect(&config).await?.retrieval(&config);
            let outcomes = engine.outcomes(&keyword, limit_or_default(limit)).await?;
            print_outcomes(&outcomes, json)?;
        }
        Commands::Evolution { entity, chunk_type } => {
            let engine = Stores::connect(&config).await?.retrieval(&config);
            let hits = engine.evolution(&entity, chunk_type).await?;
            print_hits(&hits, json)?;
        }
        Commands::Context {
            query,
            entities,
            max,
        } => {
            let engine = Stores::connect(&config).await?.retrieval(&config);
            let block = engine.context(&query, &entities, max).await?;
            if json {
                print_json(&block)?;
            } else {
                print!("{}", block.text);
            }
        }
        Commands::Stats => {
            let stores = Stores::connect(&config).await?;
            let stats = GraphLoader::new(stores.sinks(), &config.loader).stats().await;
            if json {
                return print_json(&stats);
            }
            for sink in &stats {
                println!("\n📊 {}", sink.sink);
                for (label, count) in &sink.nodes {
                    println!("  {:<24} {}", label, count);
                }
                for (rel, count) in &sink.relationships {
                    println!("  {:<24} {}", rel, count);
                }
            }
        }
    }

    Ok(())
}

async fn dry_run_ingest(config: &Config, dir: &std::path::Path, json: bool) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct Planned {
        source_id: String,
        title: String,
        category: String,
        chunks: usize,
        entities: usize,
        decisions: usize,
        actions: usize,
    }

    let pipeline = build_pipeline(config, Vec::new())?;
    let mut planned = Vec::new();
    for path in discover(dir)? {
        let input = match load_source(&path) {
            Ok(input) => input,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Cannot read source");
                continue;
            }
        };
        match pipeline.build_document(&input).await {
            Ok(doc) => planned.push(Planned {
                source_id: doc.source.id,
                title: doc.source.title,
                category: doc.source.category.to_string(),
                chunks: doc.chunks.len(),
                entities: doc.entities.len(),
                decisions: doc.decisions.len(),
                actions: doc.actions.len(),
            }),
            Err(err) => warn!(path = %path.display(), error = %err, "Source would fail"),
        }
    }

    if json {
        return print_json(&planned);
    }
    for p in &planned {
        println!(
            "{}  {:<9} chunks={:<4} entities={:<4} decisions={:<3} actions={:<3} {}",
            p.source_id, p.category, p.chunks, p.entities, p.decisions, p.actions, p.title
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(summary);
    }
    println!(
        "✅ ingested: {}  ⏭ skipped: {}  ⚠️ incomplete: {}  ❌ failed: {}",
        summary.ingested.len(),
        summary.skipped.len(),
        summary.incomplete.len(),
        summary.failed.len()
    );
    for failure in &summary.failed {
        println!("  ❌ {} ({}): {}", failure.title, failure.source, failure.error);
    }
    Ok(())
}

fn print_hits(hits: &[ChunkHit], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(hits);
    }
    if hits.is_empty() {
        println!("No chunks found");
    }
    for hit in hits {
        println!(
            "\n{} [{} | {:.2}] {} ({})",
            hit.chunk_id,
            hit.chunk_type,
            hit.importance_score,
            hit.source_title,
            hit.source_date.as_deref().unwrap_or("unknown")
        );
        println!("{}", hit.text);
    }
    Ok(())
}

fn print_outcomes(outcomes: &[OutcomeHit], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(outcomes);
    }
    if outcomes.is_empty() {
        println!("No decisions or actions found");
    }
    for outcome in outcomes {
        println!(
            "\n{} {}: {} ({}, {})",
            outcome.kind.as_str(),
            outcome.id,
            outcome.text,
            outcome.source_title,
            outcome.source_date.as_deref().unwrap_or("unknown")
        );
        if let Some(rationale) = &outcome.rationale {
            println!("  rationale: {}", rationale);
        }
        if let Some(owner) = &outcome.owner {
            println!("  owner: {}", owner);
        }
        for chunk in &outcome.chunks {
            println!("  ↳ {} {}", chunk.chunk_id, chunk.text.lines().next().unwrap_or(""));
        }
    }
    Ok(())
}
