//! Discovery of trip archives
//!
//! The public Citi Bike bucket serves an S3 `ListBucketResult` document at
//! its root; a local directory of downloaded archives works as well.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::source::SourceError;

pub const DEFAULT_BUCKET_URL: &str = "https://s3.amazonaws.com/tripdata/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    contents: Vec<Object>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Object {
    key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Catalog {
    /// Base URL of an S3-style bucket listing
    Bucket(String),
    /// Directory of `.zip` archives
    Directory(PathBuf),
}

impl Catalog {
    /// Archive locators in ingestion order
    pub async fn list(&self) -> Result<Vec<String>, SourceError> {
        match self {
            Catalog::Bucket(url) => list_bucket(&reqwest::Client::new(), url).await,
            Catalog::Directory(dir) => list_directory(dir).await,
        }
    }
}

impl std::fmt::Display for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Catalog::Bucket(url) => write!(f, "{}", url),
            Catalog::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

async fn list_bucket(client: &reqwest::Client, url: &str) -> Result<Vec<String>, SourceError> {
    let base = if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    };

    let mut locators = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let mut request = client.get(&base);
        if let Some(ref marker) = marker {
            request = request.query(&[("marker", marker)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Download {
                url: base.clone(),
                status: response.status(),
            });
        }
        let body = response.text().await?;
        let page: ListBucketResult = quick_xml::de::from_str(&body)?;
        debug!(keys = page.contents.len(), truncated = page.is_truncated, "Fetched bucket listing page");

        let last_key = page.contents.last().map(|object| object.key.clone());
        locators.extend(
            page.contents
                .into_iter()
                .filter(|object| object.key.ends_with(".zip"))
                .map(|object| format!("{}{}", base, object.key)),
        );

        match (page.is_truncated, page.next_marker.or(last_key)) {
            (true, Some(next)) => marker = Some(next),
            _ => break,
        }
    }

    info!(bucket = %base, archives = locators.len(), "Listed bucket");
    Ok(locators)
}

async fn list_directory(dir: &std::path::Path) -> Result<Vec<String>, SourceError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut locators = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "zip") && entry.file_type().await?.is_file()
        {
            locators.push(path.to_string_lossy().into_owned());
        }
    }
    locators.sort();

    info!(dir = %dir.display(), archives = locators.len(), "Listed directory");
    Ok(locators)
}
