//! Common types used across the journeys crates

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::bucket::HourOfWeek;

/// Stable integer identity of a station across the whole dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub i64);

impl StationId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for StationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 2-D point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A station node as it is written to the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub location: Coordinates,
}

impl Station {
    pub fn new(id: impl Into<StationId>, name: impl Into<String>, location: Coordinates) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location,
        }
    }
}

/// A single parsed trip record.
///
/// Timestamps are naive wall-clock times exactly as the source data
/// records them; no timezone conversion is ever applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub start_time: NaiveDateTime,
    pub stop_time: NaiveDateTime,
    pub start: Station,
    pub end: Station,
}

impl Trip {
    /// The hour-of-week bucket this trip is counted in
    pub fn bucket(&self) -> HourOfWeek {
        HourOfWeek::from_datetime(&self.start_time)
    }
}
