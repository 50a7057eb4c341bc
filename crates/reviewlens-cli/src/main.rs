mod config;
mod display;
mod pipeline;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reviewlens_ai::{OpenAiClient, SchemaRegistry};
use reviewlens_core::{HeuristicCounter, TokenCounter};
use reviewlens_store::{DocumentStore, DuckStore, MemoryStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{BatchingConfig, Config};
use crate::pipeline::{Orchestrator, Services};

/// Read from the working directory when `--config` is not given.
const DEFAULT_CONFIG: &str = "reviewlens.toml";

/// Annotate, cluster, and quantify product reviews with a language model.
#[derive(Parser, Debug)]
#[command(name = "reviewlens", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, global = true, env = "REVIEWLENS_CONFIG")]
    config: Option<PathBuf>,

    /// DuckDB document store; overrides `store.path`.
    #[arg(long, global = true, env = "REVIEWLENS_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one run id.
    Run {
        /// Run id; a timestamped id is generated when omitted.
        #[arg(long)]
        run_id: Option<String>,

        /// Entity to include (repeatable). Defaults to the entities already
        /// recorded on the run document.
        #[arg(long = "entity")]
        entities: Vec<String>,

        /// Write the quantified tables as Parquet into this directory.
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Print a persisted run and its tables.
    Show {
        #[arg(long)]
        run_id: String,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(path: Option<&Path>) -> anyhow::Result<Box<dyn DocumentStore>> {
    match path {
        Some(path) => Ok(Box::new(
            DuckStore::open_persistent(path)
                .with_context(|| format!("opening store {}", path.display()))?,
        )),
        None => {
            warn!("no store path configured, using an empty in-memory store");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}

fn token_counter(batching: &BatchingConfig) -> anyhow::Result<Arc<dyn TokenCounter>> {
    match &batching.tokenizer {
        None => Ok(Arc::new(HeuristicCounter)),
        #[cfg(feature = "tokenizers")]
        Some(path) => {
            let counter = reviewlens_core::HfTokenCounter::from_file(path)
                .with_context(|| format!("loading tokenizer {}", path.display()))?;
            Ok(Arc::new(counter))
        }
        #[cfg(not(feature = "tokenizers"))]
        Some(path) => {
            warn!(path = %path.display(), "built without tokenizers support, using byte heuristic");
            Ok(Arc::new(HeuristicCounter))
        }
    }
}

fn services(config: &Config) -> anyhow::Result<Services> {
    let key_var = &config.service.api_key_env;
    let api_key = std::env::var(key_var)
        .with_context(|| format!("API key variable {key_var} is not set"))?;
    let client = Arc::new(OpenAiClient::new(&config.service.base_url, api_key));
    Ok(Services {
        completions: client.clone(),
        embeddings: client,
        counter: token_counter(&config.batching)?,
    })
}

async fn run(
    config: &Config,
    store: &dyn DocumentStore,
    run_id: Option<String>,
    entities: Vec<String>,
    export_dir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let run_id =
        run_id.unwrap_or_else(|| chrono::Utc::now().format("run-%Y%m%dT%H%M%S").to_string());
    let registry = SchemaRegistry::builtin();
    let orchestrator = Orchestrator::new(config, store, services(config)?, &registry)
        .context("resolving annotation schemas")?
        .with_export_dir(export_dir);
    info!(run_id = %run_id, "starting run");
    Ok(orchestrator.run(&run_id, &entities).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let (config, source) = Config::resolve(cli.config.as_deref(), Path::new(DEFAULT_CONFIG))?;
    init_tracing(&config.log.level);
    info!("reviewlens v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file, using defaults"),
    }

    let store_path = cli.store.clone().or_else(|| config.store.path.clone());
    let store = open_store(store_path.as_deref())?;

    match cli.command {
        Command::Run {
            run_id,
            entities,
            export_dir,
        } => {
            let ok = run(&config, store.as_ref(), run_id, entities, export_dir).await?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Show { run_id } => {
            display::print_run(store.as_ref(), &run_id).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
