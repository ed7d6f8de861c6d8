//! In-process graph store
//!
//! Holds the graph behind a mutex and applies each connection's pipeline
//! atomically on flush. Backs `--dry-run` and the test suite, which also
//! reads the barrier and station-create counters it keeps.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use journeys_common::{Station, StationId};

use super::{GraphStore, StoreConnection, StoreError, StoreResult, Vitals};
use crate::mutation::{EdgeCounts, Mutation, TRIP_COUNTER};

#[derive(Debug, Default)]
struct MemoryGraph {
    stations: HashMap<StationId, Station>,
    edges: HashMap<(StationId, StationId), EdgeCounts>,
    counters: HashMap<&'static str, i64>,
    processed: HashMap<String, u64>,
    barriers: usize,
    station_creates: usize,
    open_connections: usize,
    // Fault injection: fail every barrier after this many have succeeded.
    fail_after_barriers: Option<usize>,
    refuse_connections: bool,
}

impl MemoryGraph {
    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::CreateStation(station) => {
                self.station_creates += 1;
                self.stations.entry(station.id).or_insert(station);
            },
            Mutation::IncrementEdge { src, dst, bucket } => {
                self.edges
                    .entry((src, dst))
                    .and_modify(|counts| counts.increment(bucket))
                    .or_insert_with(|| EdgeCounts::first_trip(bucket));
            },
            Mutation::IncrementCounter { name, by } => {
                *self.counters.entry(name).or_insert(0) += by;
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    graph: Arc<Mutex<MemoryGraph>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Barriers after the first `barriers` successful ones fail
    pub fn fail_flushes_after(self, barriers: usize) -> Self {
        self.lock().fail_after_barriers = Some(barriers);
        self
    }

    /// Every `connect` fails
    pub fn refuse_connections(self) -> Self {
        self.lock().refuse_connections = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn station(&self, id: StationId) -> Option<Station> {
        self.lock().stations.get(&id).cloned()
    }

    pub fn edge_counts(&self, src: StationId, dst: StationId) -> Option<EdgeCounts> {
        self.lock().edges.get(&(src, dst)).cloned()
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Successful flush barriers across all connections
    pub fn barriers(&self) -> usize {
        self.lock().barriers
    }

    /// Station-create mutations applied, including ones that were no-ops
    pub fn station_creates(&self) -> usize {
        self.lock().station_creates
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    type Connection = MemoryConnection;

    async fn connect(&self) -> StoreResult<MemoryConnection> {
        let mut graph = self.lock();
        if graph.refuse_connections {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        graph.open_connections += 1;
        Ok(MemoryConnection {
            graph: Arc::clone(&self.graph),
            pipeline: Vec::new(),
            closed: false,
        })
    }

    async fn is_processed(&self, locator: &str) -> StoreResult<bool> {
        Ok(self.lock().processed.contains_key(locator))
    }

    async fn mark_processed(&self, locator: &str, trips: u64) -> StoreResult<()> {
        self.lock().processed.insert(locator.to_string(), trips);
        Ok(())
    }

    async fn reset(&self) -> StoreResult<()> {
        let mut graph = self.lock();
        graph.stations.clear();
        graph.edges.clear();
        graph.counters.clear();
        graph.processed.clear();
        Ok(())
    }

    async fn vitals(&self) -> StoreResult<Vitals> {
        let graph = self.lock();
        Ok(Vitals {
            trips: graph.counters.get(TRIP_COUNTER).copied().unwrap_or(0),
            stations: graph.stations.len() as i64,
            edges: graph.edges.len() as i64,
        })
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    graph: Arc<Mutex<MemoryGraph>>,
    pipeline: Vec<Mutation>,
    closed: bool,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    fn send(&mut self, mutation: Mutation) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        self.pipeline.push(mutation);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pipeline.len()
    }

    async fn flush(&mut self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let mut graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
        if graph
            .fail_after_barriers
            .is_some_and(|limit| graph.barriers >= limit)
        {
            return Err(StoreError::Unavailable("flush failed".to_string()));
        }
        for mutation in self.pipeline.drain(..) {
            graph.apply(mutation);
        }
        graph.barriers += 1;
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        if !self.closed {
            self.closed = true;
            self.pipeline.clear();
            let mut graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
            graph.open_connections -= 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journeys_common::{Coordinates, HourOfWeek};

    fn station(id: i64) -> Station {
        Station::new(id, format!("Station {}", id), Coordinates::new(40.7, -74.0))
    }

    #[tokio::test]
    async fn test_nothing_applied_before_flush() {
        let store = MemoryGraphStore::new();
        let mut conn = store.connect().await.unwrap();

        conn.send(Mutation::create_station(&station(1))).unwrap();
        conn.send(Mutation::increment_trips(1)).unwrap();
        assert_eq!(conn.pending(), 2);
        assert_eq!(store.vitals().await.unwrap(), Vitals::default());

        conn.flush().await.unwrap();
        assert_eq!(conn.pending(), 0);
        let vitals = store.vitals().await.unwrap();
        assert_eq!(vitals.stations, 1);
        assert_eq!(vitals.trips, 1);
        assert_eq!(store.barriers(), 1);
    }

    #[tokio::test]
    async fn test_conditional_station_create() {
        let store = MemoryGraphStore::new();
        let mut a = store.connect().await.unwrap();
        let mut b = store.connect().await.unwrap();

        let mut renamed = station(7);
        renamed.name = "Later name".to_string();
        a.send(Mutation::create_station(&station(7))).unwrap();
        b.send(Mutation::create_station(&renamed)).unwrap();
        a.flush().await.unwrap();
        b.flush().await.unwrap();

        assert_eq!(store.station_creates(), 2);
        assert_eq!(store.vitals().await.unwrap().stations, 1);
        assert_eq!(store.station(StationId(7)).unwrap().name, "Station 7");
    }

    #[tokio::test]
    async fn test_close_discards_pipeline() {
        let store = MemoryGraphStore::new();
        let mut conn = store.connect().await.unwrap();
        assert_eq!(store.open_connections(), 1);

        let bucket = HourOfWeek::new(2, 17).unwrap();
        conn.send(Mutation::increment_edge(StationId(1), StationId(2), bucket))
            .unwrap();
        conn.close().await.unwrap();

        assert_eq!(store.open_connections(), 0);
        assert!(store.edge_counts(StationId(1), StationId(2)).is_none());
        assert!(matches!(
            conn.send(Mutation::increment_trips(1)),
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryGraphStore::new().fail_flushes_after(1);
        let mut conn = store.connect().await.unwrap();
        conn.flush().await.unwrap();
        assert!(matches!(
            conn.flush().await,
            Err(StoreError::Unavailable(_))
        ));

        let refusing = MemoryGraphStore::new().refuse_connections();
        assert!(refusing.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_bookkeeping_and_reset() {
        let store = MemoryGraphStore::new();
        assert!(!store.is_processed("201306-citibike-tripdata.zip").await.unwrap());
        store
            .mark_processed("201306-citibike-tripdata.zip", 577_703)
            .await
            .unwrap();
        assert!(store.is_processed("201306-citibike-tripdata.zip").await.unwrap());

        store.reset().await.unwrap();
        assert!(!store.is_processed("201306-citibike-tripdata.zip").await.unwrap());
    }
}
