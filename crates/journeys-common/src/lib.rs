//! Journeys Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the journeys workspace.
//!
//! # Overview
//!
//! - **Types**: trip records, stations and their coordinates
//! - **Buckets**: the hour-of-week index every trip edge is keyed by
//! - **Error Handling**: common error and result types
//! - **Logging**: `tracing` subscriber setup shared by all binaries
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use journeys_common::HourOfWeek;
//!
//! // Monday 08:15
//! let start = NaiveDate::from_ymd_opt(2020, 6, 1)
//!     .and_then(|d| d.and_hms_opt(8, 15, 0))
//!     .unwrap();
//! assert_eq!(HourOfWeek::from_datetime(&start).index(), 32);
//! ```

pub mod bucket;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use bucket::{BucketError, HourOfWeek, HOURS_PER_WEEK};
pub use error::{JourneysError, Result};
pub use types::{Coordinates, Station, StationId, Trip};
