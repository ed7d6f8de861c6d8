//! Per-run ingestion context
//!
//! Everything workers share lives here and is handed to each worker when
//! it is spawned, so two runs in one process never see each other's state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::StationCache;

#[derive(Debug, Clone)]
pub struct IngestContext {
    run_id: Uuid,
    stations: Arc<StationCache>,
    progress: Arc<Progress>,
}

impl IngestContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stations: Arc::new(StationCache::new()),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stations(&self) -> &StationCache {
        &self.stations
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}

impl Default for IngestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Trips acknowledged by the store during this run, across all workers
#[derive(Debug, Default)]
pub struct Progress {
    trips_flushed: AtomicU64,
    flushes: AtomicU64,
}

impl Progress {
    pub(crate) fn record_flush(&self, trips: u64) {
        self.trips_flushed.fetch_add(trips, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trips_flushed(&self) -> u64 {
        self.trips_flushed.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}
