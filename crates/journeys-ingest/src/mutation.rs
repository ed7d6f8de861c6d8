//! Graph mutations sent down a worker's pipeline
//!
//! Every mutation is idempotent or additive on the store side:
//!
//! - `CreateStation` creates the node only when no node with that id exists
//! - `IncrementEdge` creates the edge with a single counter set to 1, or adds
//!   1 to exactly one counter of an existing edge
//! - `IncrementCounter` adds to a named scalar
//!
//! Workers never read counters back; all arithmetic happens in the store.

use journeys_common::{HourOfWeek, Station, StationId, HOURS_PER_WEEK};

/// Scalar counter tracking trips acknowledged by the store
pub const TRIP_COUNTER: &str = "trips";

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateStation(Station),
    IncrementEdge {
        src: StationId,
        dst: StationId,
        bucket: HourOfWeek,
    },
    IncrementCounter {
        name: &'static str,
        by: i64,
    },
}

impl Mutation {
    pub fn create_station(station: &Station) -> Self {
        Mutation::CreateStation(station.clone())
    }

    pub fn increment_edge(src: StationId, dst: StationId, bucket: HourOfWeek) -> Self {
        Mutation::IncrementEdge { src, dst, bucket }
    }

    pub fn increment_trips(by: u64) -> Self {
        Mutation::IncrementCounter {
            name: TRIP_COUNTER,
            by: by as i64,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateStation(_) => MutationKind::CreateStation,
            Mutation::IncrementEdge { .. } => MutationKind::IncrementEdge,
            Mutation::IncrementCounter { .. } => MutationKind::IncrementCounter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    CreateStation,
    IncrementEdge,
    IncrementCounter,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::CreateStation => write!(f, "station create"),
            MutationKind::IncrementEdge => write!(f, "trip edge upsert"),
            MutationKind::IncrementCounter => write!(f, "counter increment"),
        }
    }
}

/// The 168 hour-of-week counters carried by one trip edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeCounts([i64; HOURS_PER_WEEK]);

impl EdgeCounts {
    /// Counters of a freshly created edge: all zero except `bucket`, which is 1
    pub fn first_trip(bucket: HourOfWeek) -> Self {
        let mut counts = [0; HOURS_PER_WEEK];
        counts[bucket.index()] = 1;
        Self(counts)
    }

    pub fn increment(&mut self, bucket: HourOfWeek) {
        self.0[bucket.index()] += 1;
    }

    pub fn get(&self, bucket: HourOfWeek) -> i64 {
        self.0[bucket.index()]
    }

    /// Number of trips ever counted on this edge
    pub fn total(&self) -> i64 {
        self.0.iter().sum()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

impl TryFrom<Vec<i64>> for EdgeCounts {
    type Error = Vec<i64>;

    fn try_from(counts: Vec<i64>) -> Result<Self, Self::Error> {
        <[i64; HOURS_PER_WEEK]>::try_from(counts).map(Self)
    }
}
