//! Trip record sources
//!
//! A [`TripSource`] opens one archive locator (an `http(s)` URL or a local
//! path) and hands back a [`TripReader`] that yields parsed trips until the
//! archive is exhausted.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use journeys_common::Trip;

pub mod tripdata;

pub use tripdata::TripdataReader;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to download {url}: HTTP {status}")]
    Download {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("expected .csv files in archive, found none")]
    NoCsvFiles,

    #[error("CSV header of {file} is missing columns: {missing:?}")]
    MissingColumns {
        file: String,
        missing: Vec<&'static str>,
    },

    #[error("failed to parse bucket listing: {0}")]
    Xml(#[from] quick_xml::DeError),
}

pub trait TripReader: Send {
    /// The next well-formed trip, or `None` once every file is exhausted.
    /// Malformed records are skipped, never returned as errors.
    fn next_trip(&mut self) -> Result<Option<Trip>, SourceError>;

    /// Records skipped as malformed so far
    fn skipped(&self) -> u64;
}

#[async_trait]
pub trait TripSource: Send + Sync {
    type Reader: TripReader;

    async fn open(&self, locator: &str) -> Result<Self::Reader, SourceError>;
}

pub(crate) fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Zip archives of Citi Bike trip CSVs, downloaded or read from disk
#[derive(Debug, Clone, Default)]
pub struct ArchiveSource {
    client: reqwest::Client,
}

impl ArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, SourceError> {
        if !is_remote(locator) {
            return Ok(tokio::fs::read(Path::new(locator)).await?);
        }

        debug!(url = locator, "Downloading archive");
        let response = self.client.get(locator).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Download {
                url: locator.to_string(),
                status: response.status(),
            });
        }
        let body = response.bytes().await?;
        info!(url = locator, bytes = body.len(), "Downloaded archive");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl TripSource for ArchiveSource {
    type Reader = TripdataReader;

    async fn open(&self, locator: &str) -> Result<TripdataReader, SourceError> {
        let archive = self.fetch(locator).await?;
        TripdataReader::new(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_locators() {
        assert!(is_remote("https://s3.amazonaws.com/tripdata/201306-citibike-tripdata.zip"));
        assert!(is_remote("http://localhost:9000/tripdata/a.zip"));
        assert!(!is_remote("/data/tripdata/201306-citibike-tripdata.zip"));
        assert!(!is_remote("201306-citibike-tripdata.zip"));
    }

    #[tokio::test]
    async fn test_missing_local_archive() {
        let source = ArchiveSource::new();
        let err = source.open("/nonexistent/tripdata.zip").await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
