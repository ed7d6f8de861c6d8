//! Configuration management

use serde::Serialize;
use std::path::PathBuf;

use journeys_common::{JourneysError, Result};

use crate::catalog::{Catalog, DEFAULT_BUCKET_URL};
use crate::writer::WriterConfig;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/journeys";

/// Default number of ingestion workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Default number of trips a worker pipelines between flushes.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Bookkeeping connections, on top of one dedicated connection per worker.
pub const DEFAULT_POOL_CONNECTIONS: u32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    pub database_url: String,
    pub workers: usize,
    pub batch_size: usize,
    pub bucket_url: String,
    /// Read archives from this directory instead of the bucket
    pub data_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            bucket_url: DEFAULT_BUCKET_URL.to_string(),
            data_dir: None,
        }
    }
}

impl IngestConfig {
    /// Load and validate configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from any key lookup, falling back to defaults.
    ///
    /// Values are parsed but not validated; call `validate` once every
    /// override has been applied.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            workers: parse_or(&lookup, "INGEST_WORKERS", defaults.workers)?,
            batch_size: parse_or(&lookup, "INGEST_BATCH_SIZE", defaults.batch_size)?,
            bucket_url: lookup("TRIPDATA_BUCKET_URL").unwrap_or(defaults.bucket_url),
            data_dir: lookup("TRIPDATA_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.writer()
            .validate()
            .map_err(|e| JourneysError::Config(e.to_string()))
    }

    pub fn writer(&self) -> WriterConfig {
        WriterConfig::new(self.workers, self.batch_size)
    }

    pub fn catalog(&self) -> Catalog {
        match self.data_dir {
            Some(ref dir) => Catalog::Directory(dir.clone()),
            None => Catalog::Bucket(self.bucket_url.clone()),
        }
    }

    /// Pool size for the store: bookkeeping plus room for every worker
    pub fn max_connections(&self) -> u32 {
        DEFAULT_POOL_CONNECTIONS + self.workers as u32
    }
}

fn parse_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| JourneysError::Config(format!("{} must be a positive integer, got {:?}", key, value))),
    }
}
