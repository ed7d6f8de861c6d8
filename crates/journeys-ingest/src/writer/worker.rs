//! Ingestion worker
//!
//! Each worker owns one store connection and turns trips into pipelined
//! mutations: up to two conditional station creates and one edge increment
//! per trip. When `batch_size` trip edges are pending, the worker adds the
//! trip-counter increment and flushes, blocking on the store's
//! acknowledgment before it accepts more work.

use async_channel::Receiver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use journeys_common::{Station, Trip};

use super::{WorkerError, WorkerOperation};
use crate::context::IngestContext;
use crate::mutation::Mutation;
use crate::store::{GraphStore, StoreConnection};

/// What one worker did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub trips: u64,
    pub flushes: usize,
}

pub struct IngestWorker<C: StoreConnection> {
    id: usize,
    conn: C,
    context: IngestContext,
    batch_size: usize,
    pending_commands: usize,
    pending_trips: usize,
    trips: u64,
    flushes: usize,
}

impl<C: StoreConnection> IngestWorker<C> {
    pub fn new(id: usize, conn: C, context: IngestContext, batch_size: usize) -> Self {
        Self {
            id,
            conn,
            context,
            batch_size: batch_size.max(1),
            pending_commands: 0,
            pending_trips: 0,
            trips: 0,
            flushes: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Commands sent since the last flush
    pub fn pending_commands(&self) -> usize {
        self.pending_commands
    }

    /// Trips encoded since the last flush
    pub fn pending_trips(&self) -> usize {
        self.pending_trips
    }

    /// Encode one trip into the pipeline, flushing when the batch is full
    pub async fn encode(&mut self, trip: &Trip) -> Result<(), WorkerError> {
        self.ensure_station(&trip.start)?;
        self.ensure_station(&trip.end)?;

        self.send(Mutation::increment_edge(
            trip.start.id,
            trip.end.id,
            trip.bucket(),
        ))?;
        self.pending_trips += 1;

        if self.pending_trips >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    fn ensure_station(&mut self, station: &Station) -> Result<(), WorkerError> {
        if self.context.stations().contains(station.id) {
            return Ok(());
        }
        self.send(Mutation::create_station(station))?;
        // Recorded once sent, not once acknowledged; the create is conditional.
        self.context.stations().insert(station.id);
        Ok(())
    }

    fn send(&mut self, mutation: Mutation) -> Result<(), WorkerError> {
        let operation = WorkerOperation::from(mutation.kind());
        self.conn
            .send(mutation)
            .map_err(|source| WorkerError::new(self.id, operation, source))?;
        self.pending_commands += 1;
        Ok(())
    }

    /// Count pending trips and block until the store acknowledges the pipeline
    pub async fn flush(&mut self) -> Result<(), WorkerError> {
        if self.pending_trips > 0 {
            self.send(Mutation::increment_trips(self.pending_trips as u64))?;
        }

        let commands = self.pending_commands;
        let trips = self.pending_trips;
        self.conn
            .flush()
            .await
            .map_err(|source| WorkerError::from_flush(self.id, source))?;

        info!(worker = self.id, commands, trips, "Flushed pipeline");

        self.context.progress().record_flush(trips as u64);
        self.trips += trips as u64;
        self.flushes += 1;
        self.pending_commands = 0;
        self.pending_trips = 0;
        Ok(())
    }

    /// Final flush, then close the connection
    pub async fn finish(mut self) -> Result<WorkerReport, WorkerError> {
        if let Err(e) = self.flush().await {
            self.abandon().await;
            return Err(e);
        }
        self.conn
            .close()
            .await
            .map_err(|source| WorkerError::new(self.id, WorkerOperation::Close, source))?;

        Ok(WorkerReport {
            worker: self.id,
            trips: self.trips,
            flushes: self.flushes,
        })
    }

    /// Close the connection after a failure, discarding unflushed commands
    pub async fn abandon(mut self) {
        if let Err(e) = self.conn.close().await {
            warn!(worker = self.id, error = %e, "Failed to close connection");
        }
    }
}

/// Worker task body: dial, consume the queue until it is closed and empty
/// (or the run is cancelled), then flush and close.
///
/// A failing worker cancels `cancel` so its siblings stop early.
pub(crate) async fn run<S: GraphStore>(
    id: usize,
    store: Arc<S>,
    queue: Receiver<Trip>,
    context: IngestContext,
    batch_size: usize,
    cancel: CancellationToken,
) -> Result<WorkerReport, WorkerError> {
    let result = consume(id, store, &queue, context, batch_size, &cancel).await;
    if let Err(ref e) = result {
        warn!(worker = id, error = %e, "Worker failed, cancelling ingestion");
        cancel.cancel();
    }
    // The queue stays open until cancellation is visible to submitters.
    drop(queue);
    result
}

async fn consume<S: GraphStore>(
    id: usize,
    store: Arc<S>,
    queue: &Receiver<Trip>,
    context: IngestContext,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<WorkerReport, WorkerError> {
    let conn = store
        .connect()
        .await
        .map_err(|source| WorkerError::new(id, WorkerOperation::Dial, source))?;
    let mut worker = IngestWorker::new(id, conn, context, batch_size);
    info!(worker = id, "Worker started");

    loop {
        let trip = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker = id, "Cancellation observed");
                break;
            }
            next = queue.recv() => match next {
                Ok(trip) => trip,
                Err(_) => break,
            },
        };
        if let Err(e) = worker.encode(&trip).await {
            worker.abandon().await;
            return Err(e);
        }
    }

    let report = worker.finish().await?;
    info!(
        worker = id,
        trips = report.trips,
        flushes = report.flushes,
        "Worker done"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::TRIP_COUNTER;
    use crate::store::MemoryGraphStore;
    use chrono::NaiveDate;
    use journeys_common::{Coordinates, HourOfWeek, StationId};

    fn trip(src: i64, dst: i64, day: u32, hour: u32) -> Trip {
        // June 2020: the 7th is a Sunday
        let start = NaiveDate::from_ymd_opt(2020, 6, 7 + day)
            .unwrap()
            .and_hms_opt(hour, 15, 0)
            .unwrap();
        Trip {
            start_time: start,
            stop_time: start + chrono::Duration::minutes(12),
            start: Station::new(src, format!("Station {}", src), Coordinates::new(40.7, -73.9)),
            end: Station::new(dst, format!("Station {}", dst), Coordinates::new(40.8, -73.9)),
        }
    }

    async fn worker(store: &MemoryGraphStore, batch_size: usize) -> IngestWorker<crate::store::memory::MemoryConnection> {
        let conn = store.connect().await.unwrap();
        IngestWorker::new(0, conn, IngestContext::new(), batch_size)
    }

    #[tokio::test]
    async fn test_monday_morning_trip_twice() {
        let store = MemoryGraphStore::new();
        let mut w = worker(&store, 100).await;
        let monday_8 = HourOfWeek::new(1, 8).unwrap();

        w.encode(&trip(100, 200, 1, 8)).await.unwrap();
        w.flush().await.unwrap();
        let first = store.edge_counts(StationId(100), StationId(200)).unwrap();
        assert_eq!(monday_8.index(), 32);
        assert_eq!(first.get(monday_8), 1);
        assert_eq!(first.total(), 1);

        w.encode(&trip(100, 200, 1, 8)).await.unwrap();
        w.flush().await.unwrap();
        let second = store.edge_counts(StationId(100), StationId(200)).unwrap();
        assert_eq!(second.get(monday_8), 2);
        assert_eq!(second.total(), 2);
    }

    #[tokio::test]
    async fn test_stations_created_once_per_context() {
        let store = MemoryGraphStore::new();
        let mut w = worker(&store, 100).await;

        w.encode(&trip(1, 2, 0, 9)).await.unwrap();
        assert_eq!(w.pending_commands(), 3);
        w.encode(&trip(2, 1, 0, 18)).await.unwrap();
        assert_eq!(w.pending_commands(), 4);
        w.flush().await.unwrap();

        assert_eq!(store.station_creates(), 2);
        assert_eq!(store.vitals().await.unwrap().stations, 2);
    }

    #[tokio::test]
    async fn test_flush_is_a_barrier() {
        let store = MemoryGraphStore::new();
        let mut w = worker(&store, 1000).await;

        for hour in 0..5 {
            w.encode(&trip(1, 2, 3, hour)).await.unwrap();
        }
        assert_eq!(w.pending_trips(), 5);
        assert_eq!(store.counter(TRIP_COUNTER), 0);

        w.flush().await.unwrap();
        assert_eq!(store.counter(TRIP_COUNTER), 5);
        assert_eq!(w.pending_trips(), 0);
        assert_eq!(w.pending_commands(), 0);

        w.encode(&trip(1, 2, 3, 6)).await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(store.counter(TRIP_COUNTER), 6);
    }

    #[tokio::test]
    async fn test_batch_threshold() {
        let store = MemoryGraphStore::new();
        let mut w = worker(&store, 2).await;

        w.encode(&trip(1, 2, 1, 8)).await.unwrap();
        assert_eq!(store.barriers(), 0);
        w.encode(&trip(1, 2, 1, 8)).await.unwrap();
        assert_eq!(store.barriers(), 1);
        w.encode(&trip(1, 2, 1, 8)).await.unwrap();
        assert_eq!(store.barriers(), 1);

        let report = w.finish().await.unwrap();
        assert_eq!(store.barriers(), 2);
        assert_eq!(report.flushes, 2);
        assert_eq!(report.trips, 3);
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.counter(TRIP_COUNTER), 3);
    }

    #[tokio::test]
    async fn test_failed_flush_names_worker() {
        let store = MemoryGraphStore::new().fail_flushes_after(0);
        let mut w = worker(&store, 10).await;
        w.encode(&trip(1, 2, 1, 8)).await.unwrap();

        let err = w.flush().await.unwrap_err();
        assert_eq!(err.worker, 0);
        assert_eq!(err.operation, WorkerOperation::Flush);
    }
}
