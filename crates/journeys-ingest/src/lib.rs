//! Journeys Ingest Library
//!
//! Concurrent, batched ingestion of Citi Bike trip records into a graph of
//! stations and hour-of-week trip edges.
//!
//! # Pipeline
//!
//! ```text
//! Catalog -> TripSource -> Importer -> DataWriter queue -> IngestWorker xN -> GraphStore
//! ```
//!
//! - [`writer::DataWriter`] owns the worker pool and the hand-off queue
//! - [`writer::IngestWorker`] pipelines station creates and edge increments
//!   on its own store connection, flushing every `batch_size` trips
//! - [`cache::StationCache`] skips station creates already sent this run
//! - [`store::GraphStore`] is implemented for PostgreSQL and in memory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use journeys_ingest::catalog::Catalog;
//! use journeys_ingest::importer::Importer;
//! use journeys_ingest::source::ArchiveSource;
//! use journeys_ingest::store::PgGraphStore;
//! use journeys_ingest::writer::WriterConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = PgGraphStore::connect("postgresql://localhost/journeys", 4).await?;
//!     store.migrate().await?;
//!
//!     let importer = Importer::new(
//!         Arc::new(store),
//!         ArchiveSource::new(),
//!         Catalog::Directory("./data/tripdata".into()),
//!         WriterConfig::new(2, 10_000),
//!     );
//!     let summary = importer.run(false).await?;
//!     println!("{} trips", summary.vitals.trips);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod importer;
pub mod mutation;
pub mod source;
pub mod store;
pub mod writer;

pub use context::IngestContext;
pub use importer::{ImportSummary, Importer};
pub use writer::{DataWriter, IngestError, WriterConfig};
