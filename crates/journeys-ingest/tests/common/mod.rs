//! Shared helpers for the journeys-ingest integration tests
//!
//! - trip and station builders on a fixed calendar week
//! - zip archive fixtures in the Citi Bike CSV layout
//! - a PostgreSQL test container with migrations applied
//!
//! Container tests require Docker and are `#[ignore]`d; run them with
//! `cargo test -p journeys-ingest -- --ignored`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use journeys_common::{Coordinates, Station, Trip};
use std::io::{Cursor, Write};
use std::path::Path;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use journeys_ingest::store::PgGraphStore;

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,journeys_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Trip Builders
// ============================================================================

/// Wall-clock time in the week of Sunday 2020-06-07; `weekday` 0 is Sunday
pub fn at(weekday: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 6, 7 + weekday)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .expect("valid test timestamp")
}

pub fn station(id: i64) -> Station {
    Station::new(
        id,
        format!("Station {}", id),
        Coordinates::new(40.70 + id as f64 * 0.001, -74.00 + id as f64 * 0.001),
    )
}

pub fn trip(src: i64, dst: i64, start: NaiveDateTime) -> Trip {
    Trip {
        start_time: start,
        stop_time: start + Duration::minutes(14),
        start: station(src),
        end: station(dst),
    }
}

// ============================================================================
// Archive Fixtures
// ============================================================================

pub const CSV_HEADER: &str = "tripduration,starttime,stoptime,start station id,start station name,start station latitude,start station longitude,end station id,end station name,end station latitude,end station longitude,bikeid,usertype,birth year,gender";

pub fn csv_row(trip: &Trip) -> String {
    format!(
        "840,{},{},{},{},{},{},{},{},{},{},14529,Subscriber,1986,1",
        trip.start_time.format("%Y-%m-%d %H:%M:%S"),
        trip.stop_time.format("%Y-%m-%d %H:%M:%S"),
        trip.start.id,
        trip.start.name,
        trip.start.location.latitude,
        trip.start.location.longitude,
        trip.end.id,
        trip.end.name,
        trip.end.location.latitude,
        trip.end.location.longitude,
    )
}

/// A zip holding one CSV with `trips` plus `malformed` unparseable rows
pub fn archive_bytes(trips: &[Trip], malformed: usize) -> Vec<u8> {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for trip in trips {
        csv.push_str(&csv_row(trip));
        csv.push('\n');
    }
    for _ in 0..malformed {
        csv.push_str("840,NULL,NULL,NULL,,,,,,,,14529,Subscriber,1986,1\n");
    }

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("tripdata.csv", zip::write::SimpleFileOptions::default())
        .expect("start zip entry");
    writer.write_all(csv.as_bytes()).expect("write zip entry");
    writer.finish().expect("finish zip").into_inner()
}

pub fn write_archive(dir: &Path, name: &str, trips: &[Trip], malformed: usize) {
    std::fs::write(dir.join(name), archive_bytes(trips, malformed)).expect("write archive");
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    store: PgGraphStore,
    connection_string: String,
}

impl TestPostgres {
    /// Start a PostgreSQL container and apply the graph migrations
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let store = PgGraphStore::connect(&connection_string, 4)
            .await
            .context("Failed to connect to PostgreSQL")?;
        store.migrate().await.context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            store,
            connection_string,
        })
    }

    pub fn store(&self) -> &PgGraphStore {
        &self.store
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
