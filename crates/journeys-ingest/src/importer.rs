//! Import orchestrator
//!
//! Walks the catalog in order and ingests every archive not yet recorded
//! as processed. Each archive gets its own [`DataWriter`]; the archive is
//! marked processed only after the writer has drained and every worker's
//! final flush was acknowledged, so an interrupted run re-ingests the
//! unfinished archive from scratch next time.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument};

use crate::catalog::Catalog;
use crate::context::IngestContext;
use crate::source::{TripReader, TripSource};
use crate::store::{GraphStore, Vitals};
use crate::writer::{DataWriter, IngestError, WriterConfig};

/// Outcome of ingesting one archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub locator: String,
    pub trips: u64,
    pub skipped_records: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub files_listed: usize,
    pub files_imported: usize,
    pub files_already_processed: usize,
    pub trips: u64,
    pub skipped_records: u64,
    pub vitals: Vitals,
    pub elapsed: Duration,
}

pub struct Importer<S: GraphStore, T: TripSource> {
    store: Arc<S>,
    source: T,
    catalog: Catalog,
    writer: WriterConfig,
    context: IngestContext,
}

impl<S: GraphStore, T: TripSource> Importer<S, T> {
    pub fn new(store: Arc<S>, source: T, catalog: Catalog, writer: WriterConfig) -> Self {
        Self {
            store,
            source,
            catalog,
            writer,
            context: IngestContext::new(),
        }
    }

    pub fn context(&self) -> &IngestContext {
        &self.context
    }

    /// Ingest every archive in the catalog that is not yet processed.
    /// With `reset`, the graph and bookkeeping are cleared first.
    pub async fn run(&self, reset: bool) -> Result<ImportSummary> {
        let started = Instant::now();
        info!(run = %self.context.run_id(), catalog = %self.catalog, "Importer running");

        if reset {
            info!("Resetting graph");
            self.store.reset().await.context("Failed to reset graph")?;
        }

        let locators = self
            .catalog
            .list()
            .await
            .with_context(|| format!("Failed to list archives in {}", self.catalog))?;

        let mut summary = ImportSummary {
            files_listed: locators.len(),
            ..Default::default()
        };

        for (idx, locator) in locators.iter().enumerate() {
            let position = idx + 1;
            if self
                .store
                .is_processed(locator)
                .await
                .context("Failed to read processed archives")?
            {
                info!(file = position, total = locators.len(), locator = %locator, "Already imported");
                summary.files_already_processed += 1;
                continue;
            }

            info!(file = position, total = locators.len(), locator = %locator, "Importing");
            let report = self
                .import_file(locator)
                .instrument(info_span!("archive", file = position))
                .await
                .with_context(|| format!("Failed to import {}", locator))?;

            self.store
                .mark_processed(locator, report.trips)
                .await
                .with_context(|| format!("Failed to mark {} as processed", locator))?;

            info!(
                file = position,
                total = locators.len(),
                locator = %locator,
                trips = report.trips,
                skipped_records = report.skipped_records,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Imported"
            );
            summary.files_imported += 1;
            summary.trips += report.trips;
            summary.skipped_records += report.skipped_records;
        }

        summary.vitals = self.store.vitals().await.context("Failed to read vitals")?;
        summary.elapsed = started.elapsed();

        info!(
            imported = summary.files_imported,
            already_processed = summary.files_already_processed,
            trips = summary.trips,
            graph_trips = summary.vitals.trips,
            stations = summary.vitals.stations,
            edges = summary.vitals.edges,
            elapsed_secs = summary.elapsed.as_secs(),
            "Import finished"
        );
        Ok(summary)
    }

    /// Ingest one archive and wait until all of its trips are acknowledged
    pub async fn import_file(&self, locator: &str) -> Result<FileReport> {
        let started = Instant::now();
        let mut reader = self
            .source
            .open(locator)
            .await
            .context("Failed to open archive")?;

        let writer = DataWriter::start(Arc::clone(&self.store), self.writer, self.context.clone())?;
        let fed = feed(&writer, &mut reader).await;
        let drained = writer.shutdown().await;

        let report = match (fed, drained) {
            // A worker failure is the root cause of any aborted submit.
            (_, Err(e @ (IngestError::Worker(_) | IngestError::WorkerPanicked(_)))) => {
                return Err(e.into())
            },
            (Err(e), _) => return Err(e),
            (Ok(_), Err(e)) => return Err(e.into()),
            (Ok(_), Ok(report)) => report,
        };

        Ok(FileReport {
            locator: locator.to_string(),
            trips: report.trips,
            skipped_records: reader.skipped(),
            elapsed: started.elapsed(),
        })
    }
}

async fn feed<R: TripReader>(writer: &DataWriter, reader: &mut R) -> Result<u64> {
    let mut submitted = 0u64;
    while let Some(trip) = reader.next_trip().context("Failed to read archive")? {
        writer.submit(trip).await?;
        submitted += 1;
    }
    Ok(submitted)
}
