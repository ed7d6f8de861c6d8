//! Ingestion coordinator
//!
//! [`DataWriter`] owns a fixed pool of [`IngestWorker`]s and the hand-off
//! queue feeding them. The queue holds a single trip, so `submit` waits
//! until a worker is ready for it and a slow store slows the caller down.
//!
//! Shutdown is explicit: [`DataWriter::shutdown`] closes the queue, waits
//! for every worker to drain, flush and close its connection, and returns
//! the first worker error if there was one. A worker that fails cancels
//! the run so the others stop early, flush what they already received and
//! disconnect cleanly.

use async_channel::Sender;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use journeys_common::Trip;

use crate::context::IngestContext;
use crate::mutation::MutationKind;
use crate::store::{GraphStore, StoreError};

pub mod worker;

pub use worker::{IngestWorker, WorkerReport};

/// What a worker was doing when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOperation {
    Dial,
    CreateStation,
    IncrementEdge,
    IncrementCounter,
    Flush,
    Close,
}

impl From<MutationKind> for WorkerOperation {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::CreateStation => WorkerOperation::CreateStation,
            MutationKind::IncrementEdge => WorkerOperation::IncrementEdge,
            MutationKind::IncrementCounter => WorkerOperation::IncrementCounter,
        }
    }
}

impl fmt::Display for WorkerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerOperation::Dial => f.write_str("dial"),
            WorkerOperation::CreateStation => write!(f, "{}", MutationKind::CreateStation),
            WorkerOperation::IncrementEdge => write!(f, "{}", MutationKind::IncrementEdge),
            WorkerOperation::IncrementCounter => write!(f, "{}", MutationKind::IncrementCounter),
            WorkerOperation::Flush => f.write_str("flush"),
            WorkerOperation::Close => f.write_str("close"),
        }
    }
}

#[derive(Error, Debug)]
#[error("worker {worker} failed during {operation}: {source}")]
pub struct WorkerError {
    pub worker: usize,
    pub operation: WorkerOperation,
    #[source]
    pub source: StoreError,
}

impl WorkerError {
    pub fn new(worker: usize, operation: WorkerOperation, source: StoreError) -> Self {
        Self {
            worker,
            operation,
            source,
        }
    }

    /// A flush failure names the mutation the store rejected, if any
    pub(crate) fn from_flush(worker: usize, source: StoreError) -> Self {
        let operation = match &source {
            StoreError::Rejected { kind, .. } => WorkerOperation::from(*kind),
            _ => WorkerOperation::Flush,
        };
        Self::new(worker, operation, source)
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("writer is shut down; no more trips can be submitted")]
    Closed,

    #[error("writer was already shut down")]
    AlreadyShutDown,

    #[error("ingestion aborted after a worker failure")]
    Aborted,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),

    #[error("invalid writer configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    pub workers: usize,
    /// Trips per worker between flushes
    pub batch_size: usize,
}

impl WriterConfig {
    pub fn new(workers: usize, batch_size: usize) -> Self {
        Self {
            workers,
            batch_size,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.workers == 0 {
            return Err(IngestError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: 10_000,
        }
    }
}

/// Totals over every worker of one writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub trips: u64,
    pub flushes: usize,
    pub workers: Vec<WorkerReport>,
}

type WorkerHandle = JoinHandle<Result<WorkerReport, WorkerError>>;

pub struct DataWriter {
    queue: Sender<Trip>,
    cancel: CancellationToken,
    handles: Mutex<Vec<WorkerHandle>>,
    shut_down: AtomicBool,
    context: IngestContext,
    workers: usize,
}

impl DataWriter {
    /// Spawn the worker pool and return immediately.
    ///
    /// Each worker dials its own connection from inside its task, so a
    /// refused connection surfaces from `submit` or `shutdown`.
    /// Must be called from within a Tokio runtime.
    pub fn start<S: GraphStore>(
        store: Arc<S>,
        config: WriterConfig,
        context: IngestContext,
    ) -> Result<Self, IngestError> {
        config.validate()?;

        // async-channel has no zero-capacity rendezvous; one slot is the closest.
        let (queue, receiver) = async_channel::bounded(1);
        let cancel = CancellationToken::new();

        let handles = (0..config.workers)
            .map(|id| {
                let span = info_span!("worker", run = %context.run_id(), worker = id);
                tokio::spawn(
                    worker::run(
                        id,
                        Arc::clone(&store),
                        receiver.clone(),
                        context.clone(),
                        config.batch_size,
                        cancel.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();

        info!(
            run = %context.run_id(),
            workers = config.workers,
            batch_size = config.batch_size,
            "Data writer started"
        );

        Ok(Self {
            queue,
            cancel,
            handles: Mutex::new(handles),
            shut_down: AtomicBool::new(false),
            context,
            workers: config.workers,
        })
    }

    pub fn context(&self) -> &IngestContext {
        &self.context
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue one trip for the next free worker.
    ///
    /// The queue holds a single trip, so this returns as soon as that slot is
    /// free, possibly before any worker has connected. Backpressure starts
    /// with the second trip: it waits until a worker takes the first one.
    pub async fn submit(&self, trip: Trip) -> Result<(), IngestError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(IngestError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestError::Aborted),
            sent = self.queue.send(trip) => sent.map_err(|_| {
                if self.cancel.is_cancelled() {
                    IngestError::Aborted
                } else {
                    IngestError::Closed
                }
            }),
        }
    }

    /// Close the queue and wait for every worker to drain, flush and
    /// disconnect. Returns the first worker error after all workers stop.
    pub async fn shutdown(&self) -> Result<WriterReport, IngestError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(IngestError::AlreadyShutDown);
        }
        self.queue.close();

        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let mut report = WriterReport::default();
        let mut first_error = None;

        for outcome in futures::future::join_all(handles).await {
            let failure = match outcome {
                Ok(Ok(worker)) => {
                    report.trips += worker.trips;
                    report.flushes += worker.flushes;
                    report.workers.push(worker);
                    continue;
                },
                Ok(Err(e)) => IngestError::Worker(e),
                Err(join_error) => {
                    self.cancel.cancel();
                    IngestError::WorkerPanicked(join_error.to_string())
                },
            };
            error!(error = %failure, "Worker did not finish cleanly");
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    run = %self.context.run_id(),
                    trips = report.trips,
                    flushes = report.flushes,
                    "Data writer shut down"
                );
                Ok(report)
            },
        }
    }
}

impl Drop for DataWriter {
    fn drop(&mut self) {
        // Workers still running when the writer is dropped stop at their next item.
        if !self.shut_down.load(Ordering::Acquire) {
            self.queue.close();
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(WriterConfig::default().validate().is_ok());
        assert!(matches!(
            WriterConfig::new(0, 10).validate(),
            Err(IngestError::InvalidConfig(_))
        ));
        assert!(matches!(
            WriterConfig::new(4, 0).validate(),
            Err(IngestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_worker_error_names_operation() {
        let err = WorkerError::from_flush(
            3,
            StoreError::Rejected {
                kind: MutationKind::IncrementEdge,
                source: sqlx::Error::RowNotFound,
            },
        );
        assert_eq!(err.operation, WorkerOperation::IncrementEdge);
        assert!(err.to_string().starts_with("worker 3 failed during trip edge upsert"));

        let err = WorkerError::from_flush(1, StoreError::Closed);
        assert_eq!(err.operation, WorkerOperation::Flush);
    }

    #[test]
    fn test_mutation_operations_print_like_their_kind() {
        for kind in [
            MutationKind::CreateStation,
            MutationKind::IncrementEdge,
            MutationKind::IncrementCounter,
        ] {
            assert_eq!(WorkerOperation::from(kind).to_string(), kind.to_string());
        }
        assert_eq!(WorkerOperation::Dial.to_string(), "dial");
    }
}
