//! Station dedup cache
//!
//! A process-local record of station ids this run has already sent a
//! create for. It only saves round trips: the store-side create is
//! conditional, so a stale or missing entry never produces a duplicate.

use dashmap::DashSet;
use journeys_common::StationId;

/// Concurrent set of station ids, sharded internally
#[derive(Debug, Default)]
pub struct StationCache {
    known: DashSet<StationId>,
}

impl StationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: StationId) -> bool {
        self.known.contains(&id)
    }

    /// Returns `true` if the id was not yet known
    pub fn insert(&self, id: StationId) -> bool {
        self.known.insert(id)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_and_contains() {
        let cache = StationCache::new();
        assert!(cache.is_empty());
        assert!(!cache.contains(StationId(72)));
        assert!(cache.insert(StationId(72)));
        assert!(!cache.insert(StationId(72)));
        assert!(cache.contains(StationId(72)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let cache = Arc::new(StationCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    (0..1000)
                        .filter(|id| cache.insert(StationId(*id)))
                        .count()
                })
            })
            .collect();

        let newly_inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(newly_inserted, 1000);
        assert_eq!(cache.len(), 1000);
    }
}
