//! Hour-of-week buckets
//!
//! A week is partitioned into 168 hour-long slots. The slot index is
//! `weekday * 24 + hour`, where `weekday` counts from Sunday:
//!
//! | weekday | 0 | 1 | 2 | 3 | 4 | 5 | 6 |
//! |---------|---|---|---|---|---|---|---|
//! | day     | Sun | Mon | Tue | Wed | Thu | Fri | Sat |
//!
//! The hour is the wall-clock hour of the trip's start time, without any
//! timezone conversion. Readers of the edge counters must use the same
//! numbering.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of buckets (and counters on every trip edge)
pub const HOURS_PER_WEEK: usize = 7 * 24;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("weekday index {0} is out of range 0..7")]
    Weekday(u32),

    #[error("hour {0} is out of range 0..24")]
    Hour(u32),

    #[error("bucket index {0} is out of range 0..168")]
    Index(usize),
}

/// Index of one hour-of-week bucket, always in `0..168`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct HourOfWeek(u8);

impl HourOfWeek {
    /// Build a bucket from a Sunday-based weekday index and an hour of day
    pub fn new(weekday: u32, hour: u32) -> Result<Self, BucketError> {
        if weekday > 6 {
            return Err(BucketError::Weekday(weekday));
        }
        if hour > 23 {
            return Err(BucketError::Hour(hour));
        }
        Ok(Self((weekday * 24 + hour) as u8))
    }

    /// Bucket of a naive wall-clock timestamp. Total for every valid timestamp.
    pub fn from_datetime(time: &NaiveDateTime) -> Self {
        let weekday = time.weekday().num_days_from_sunday();
        // chrono guarantees weekday < 7 and hour < 24
        Self((weekday * 24 + time.hour()) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn weekday(self) -> u32 {
        u32::from(self.0) / 24
    }

    pub fn hour(self) -> u32 {
        u32::from(self.0) % 24
    }
}

impl TryFrom<usize> for HourOfWeek {
    type Error = BucketError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        if index >= HOURS_PER_WEEK {
            return Err(BucketError::Index(index));
        }
        Ok(Self(index as u8))
    }
}

impl From<HourOfWeek> for usize {
    fn from(bucket: HourOfWeek) -> Self {
        bucket.index()
    }
}

impl std::fmt::Display for HourOfWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
        write!(f, "{} {:02}h", DAYS[self.weekday() as usize], self.hour())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    #[test]
    fn test_monday_morning() {
        let t = NaiveDate::from_ymd_opt(2020, 6, 1)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap();
        let bucket = HourOfWeek::from_datetime(&t);
        assert_eq!(bucket.weekday(), 1);
        assert_eq!(bucket.hour(), 8);
        assert_eq!(bucket.index(), 32);
        assert_eq!(bucket.to_string(), "Mon 08h");
    }

    #[test]
    fn test_week_boundaries() {
        let sunday_midnight = NaiveDate::from_ymd_opt(2019, 12, 29)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(HourOfWeek::from_datetime(&sunday_midnight).index(), 0);

        let saturday_late = NaiveDate::from_ymd_opt(2020, 1, 4)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(HourOfWeek::from_datetime(&saturday_late).index(), 167);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert_eq!(HourOfWeek::new(7, 0), Err(BucketError::Weekday(7)));
        assert_eq!(HourOfWeek::new(0, 24), Err(BucketError::Hour(24)));
        assert_eq!(HourOfWeek::try_from(168), Err(BucketError::Index(168)));
        assert_eq!(HourOfWeek::new(6, 23).unwrap().index(), 167);
    }

    proptest! {
        #[test]
        fn prop_bucket_in_range(secs in 0i64..4_102_444_800i64) {
            let t = chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc();
            let bucket = HourOfWeek::from_datetime(&t);
            prop_assert!(bucket.index() < HOURS_PER_WEEK);
            prop_assert_eq!(bucket.index() as u32, bucket.weekday() * 24 + bucket.hour());
            prop_assert_eq!(HourOfWeek::try_from(bucket.index()), Ok(bucket));
        }

        #[test]
        fn prop_new_matches_index(weekday in 0u32..7, hour in 0u32..24) {
            let bucket = HourOfWeek::new(weekday, hour).unwrap();
            prop_assert_eq!(bucket.weekday(), weekday);
            prop_assert_eq!(bucket.hour(), hour);
        }
    }
}
