use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobsync_core::job_cache_key;
use jobsync_ingest::{IngestConfig, Ingestor};
use jobsync_storage::{JobCache, PgJobStore, RedisJobCache};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "jobsync")]
#[command(about = "Job posting ingest and report tooling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest every batch file in the data directory.
    Ingest {
        /// Print the run report as JSON once ingestion finishes.
        #[arg(long)]
        json: bool,
    },
    /// Export all stored jobs to a semicolon-delimited CSV file.
    Report {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Apply pending database migrations.
    Migrate,
    /// Show the cached copy of a stored job.
    Cached { store_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    let outcome = match cli.command.unwrap_or(Commands::Ingest { json: false }) {
        Commands::Ingest { json } => ingest(&config, json).await,
        Commands::Report { out } => report(&config, out).await,
        Commands::Migrate => migrate(&config).await,
        Commands::Cached { store_id } => cached(&config, store_id).await,
    };

    if let Err(err) = &outcome {
        error!(error = format!("{err:#}"), "jobsync failed");
    }
    outcome
}

// RUST_LOG filters (default "info"); LOG_FORMAT=json switches to JSON lines.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn connect_store(config: &IngestConfig) -> Result<PgJobStore> {
    PgJobStore::connect(&config.database_url, config.backoff())
        .await
        .context("connecting to postgres")
}

async fn connect_cache(config: &IngestConfig) -> Result<RedisJobCache> {
    if !config.redis_enabled {
        info!("redis disabled; cache writes will be skipped");
        return Ok(RedisJobCache::disabled());
    }
    RedisJobCache::connect(&config.redis_url, config.backoff())
        .await
        .context("connecting to redis")
}

async fn ingest(config: &IngestConfig, json: bool) -> Result<()> {
    let store = Arc::new(connect_store(config).await?);
    let cache = match connect_cache(config).await {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            store.close().await;
            return Err(err);
        }
    };

    let run = async {
        store.migrate().await.context("applying migrations")?;
        Ingestor::new(config, store.clone(), cache.clone())
            .with_progress_output(true)
            .ingest_all()
            .await
    }
    .await;

    cache.close().await;
    store.close().await;

    let summary = run?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serializing run report")?
        );
    } else {
        println!(
            "ingest complete: files={} total={} created={} updated={} failed={}",
            summary.files.len(),
            summary.total(),
            summary.created(),
            summary.updated(),
            summary.failed()
        );
    }
    Ok(())
}

async fn report(config: &IngestConfig, out: Option<PathBuf>) -> Result<()> {
    let path = out.unwrap_or_else(|| config.report_path.clone());
    let store = connect_store(config).await?;
    let written = jobsync_report::write_report(&store, &path).await;
    store.close().await;

    let summary = written?;
    println!("report written: path={} rows={}", path.display(), summary.rows);
    Ok(())
}

async fn migrate(config: &IngestConfig) -> Result<()> {
    let store = connect_store(config).await?;
    let applied = store.migrate().await.context("applying migrations");
    store.close().await;
    applied?;
    println!("migrations applied");
    Ok(())
}

async fn cached(config: &IngestConfig, store_id: Uuid) -> Result<()> {
    let cache = connect_cache(config).await?;
    let key = job_cache_key(store_id);
    let value = cache.get(&key).await;
    cache.close().await;

    match value {
        Some(record) => println!(
            "{}",
            serde_json::to_string_pretty(&record).context("rendering cached record")?
        ),
        None => println!("{key}: not cached"),
    }
    Ok(())
}
