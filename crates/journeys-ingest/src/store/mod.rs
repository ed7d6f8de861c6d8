//! Graph store interface
//!
//! A [`GraphStore`] hands out dedicated [`StoreConnection`]s, one per
//! worker. A connection is a pipeline: [`StoreConnection::send`] queues a
//! mutation without waiting, and [`StoreConnection::flush`] is the barrier
//! that returns only once the store has applied and acknowledged everything
//! sent before it.
//!
//! The store also keeps the orchestrator's bookkeeping of which source
//! archives have been fully ingested.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::mutation::{Mutation, MutationKind};

pub mod memory;
pub mod postgres;

pub use memory::MemoryGraphStore;
pub use postgres::PgGraphStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("store rejected {kind}: {source}")]
    Rejected {
        kind: MutationKind,
        #[source]
        source: sqlx::Error,
    },

    #[error("store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("connection is closed")]
    Closed,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counts reported by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Vitals {
    pub trips: i64,
    pub stations: i64,
    pub edges: i64,
}

#[async_trait]
pub trait GraphStore: Send + Sync + 'static {
    type Connection: StoreConnection + 'static;

    /// Dial a new connection owned by exactly one worker
    async fn connect(&self) -> StoreResult<Self::Connection>;

    async fn is_processed(&self, locator: &str) -> StoreResult<bool>;

    async fn mark_processed(&self, locator: &str, trips: u64) -> StoreResult<()>;

    /// Delete every station, edge, counter and processed-file entry
    async fn reset(&self) -> StoreResult<()>;

    async fn vitals(&self) -> StoreResult<Vitals>;
}

#[async_trait]
pub trait StoreConnection: Send {
    /// Queue a mutation on this connection's pipeline
    fn send(&mut self, mutation: Mutation) -> StoreResult<()>;

    /// Mutations sent but not yet acknowledged
    fn pending(&self) -> usize;

    /// Apply everything sent so far and wait for the acknowledgment
    async fn flush(&mut self) -> StoreResult<()>;

    /// Close the connection. Unflushed mutations are discarded.
    async fn close(&mut self) -> StoreResult<()>;
}
