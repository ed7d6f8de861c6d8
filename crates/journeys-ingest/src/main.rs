//! Journeys Ingest - trip data ingestion tool

use anyhow::{Context, Result};
use clap::Parser;
use journeys_common::logging::{init_logging, LogConfig, LogLevel};
use journeys_ingest::config::IngestConfig;
use journeys_ingest::source::ArchiveSource;
use journeys_ingest::store::{GraphStore, MemoryGraphStore, PgGraphStore};
use journeys_ingest::{ImportSummary, Importer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "journeys-ingest")]
#[command(author, version, about = "Citi Bike trip ingestion tool")]
struct Cli {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Number of ingestion workers
    #[arg(short, long, env = "INGEST_WORKERS")]
    workers: Option<usize>,

    /// Trips each worker pipelines between flushes
    #[arg(short, long, env = "INGEST_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Bucket listing to import from
    #[arg(long, env = "TRIPDATA_BUCKET_URL")]
    bucket_url: Option<String>,

    /// Import archives from a local directory instead of the bucket
    #[arg(long, env = "TRIPDATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Delete the graph and processed-archive records before importing
    #[arg(long)]
    reset: bool,

    /// Ingest into an in-memory graph; nothing is written to the database
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags and their environment fallbacks are already resolved by clap;
    /// anything still unset takes its default. Validated once, here.
    fn config(&self) -> Result<IngestConfig> {
        let defaults = IngestConfig::default();
        let config = IngestConfig {
            database_url: self.database_url.clone().unwrap_or(defaults.database_url),
            workers: self.workers.unwrap_or(defaults.workers),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            bucket_url: self.bucket_url.clone().unwrap_or(defaults.bucket_url),
            data_dir: self.data_dir.clone().or(defaults.data_dir),
        };
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

async fn import<S: GraphStore>(store: S, config: &IngestConfig, reset: bool) -> Result<ImportSummary> {
    let importer = Importer::new(
        Arc::new(store),
        ArchiveSource::new(),
        config.catalog(),
        config.writer(),
    );
    importer.run(reset).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("journeys-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = cli.config()?;
    info!(
        workers = config.workers,
        batch_size = config.batch_size,
        dry_run = cli.dry_run,
        "Starting ingestion"
    );

    let summary = if cli.dry_run {
        import(MemoryGraphStore::new(), &config, cli.reset).await?
    } else {
        let store = PgGraphStore::connect(&config.database_url, config.max_connections())
            .await
            .context("Failed to connect to database")?;
        store.migrate().await?;
        import(store, &config, cli.reset).await?
    };

    info!(
        trips = summary.vitals.trips,
        stations = summary.vitals.stations,
        edges = summary.vitals.edges,
        "Ingestion complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_wins_over_bad_environment_value() {
        std::env::set_var("INGEST_BATCH_SIZE", "lots");
        let cli = Cli::try_parse_from(["journeys-ingest", "--batch-size", "500", "-w", "2"])
            .unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_invalid_flags_are_rejected_once() {
        let cli = Cli::try_parse_from(["journeys-ingest", "--batch-size", "0", "-w", "2"])
            .unwrap();
        let err = cli.config().unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid configuration"));
    }
}
