//! PostgreSQL graph store
//!
//! Stations, trip edges and counters live in plain tables (see
//! `migrations/`). Each worker gets its own `PgConnection` outside the pool;
//! its pipeline is buffered client-side. A flush merges the buffer into one
//! statement per kind of row and runs them in one transaction. The commit is
//! the acknowledgment.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use journeys_common::{Station, StationId, HOURS_PER_WEEK};

use super::{GraphStore, StoreConnection, StoreError, StoreResult, Vitals};
use crate::mutation::{EdgeCounts, Mutation, MutationKind, TRIP_COUNTER};

// Rows per station insert; four binds each keeps a statement under the
// 65535 bind parameter limit.
const STATION_CHUNK_SIZE: usize = 10_000;

// Edge i's delta counters are $3[(i - 1) * 168 + 1 : i * 168].
const UPSERT_EDGES: &str = r#"
    INSERT INTO trip_edges (src_station_id, dst_station_id, counts)
    SELECT e.src, e.dst, ($3::BIGINT[])[((e.ord - 1) * 168 + 1)::INT : (e.ord * 168)::INT]
    FROM UNNEST($1::BIGINT[], $2::BIGINT[]) WITH ORDINALITY AS e(src, dst, ord)
    ORDER BY e.src, e.dst
    ON CONFLICT (src_station_id, dst_station_id)
    DO UPDATE SET counts = ARRAY(
        SELECT trip_edges.counts[h] + EXCLUDED.counts[h]
        FROM generate_series(1, 168) AS h
        ORDER BY h
    )
"#;

const INCREMENT_COUNTER: &str = r#"
    INSERT INTO ingest_counters (name, value)
    VALUES ($1, $2)
    ON CONFLICT (name) DO UPDATE SET value = ingest_counters.value + EXCLUDED.value
"#;

#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: PgPool,
    options: PgConnectOptions,
}

impl PgGraphStore {
    /// Connect the bookkeeping pool. Worker connections are dialed separately.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options: PgConnectOptions = url.parse().map_err(StoreError::Connect)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options.clone())
            .await
            .map_err(StoreError::Connect)?;

        info!(max_connections, "Database connection pool created");

        Ok(Self { pool, options })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let options = pool.connect_options().as_ref().clone();
        Self { pool, options }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn edge_counts(
        &self,
        src: StationId,
        dst: StationId,
    ) -> StoreResult<Option<EdgeCounts>> {
        let counts: Option<Vec<i64>> = sqlx::query_scalar(
            "SELECT counts FROM trip_edges WHERE src_station_id = $1 AND dst_station_id = $2",
        )
        .bind(src.get())
        .bind(dst.get())
        .fetch_optional(&self.pool)
        .await?;

        counts
            .map(|counts| {
                EdgeCounts::try_from(counts).map_err(|counts| {
                    StoreError::Unavailable(format!(
                        "edge {}->{} has {} counters",
                        src,
                        dst,
                        counts.len()
                    ))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    type Connection = PgStoreConnection;

    async fn connect(&self) -> StoreResult<PgStoreConnection> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(StoreError::Connect)?;
        Ok(PgStoreConnection {
            conn: Some(conn),
            pipeline: Vec::new(),
        })
    }

    async fn is_processed(&self, locator: &str) -> StoreResult<bool> {
        let processed: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM processed_files WHERE locator = $1)")
                .bind(locator)
                .fetch_one(&self.pool)
                .await?;
        Ok(processed)
    }

    async fn mark_processed(&self, locator: &str, trips: u64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_files (locator, trips)
            VALUES ($1, $2)
            ON CONFLICT (locator) DO UPDATE SET trips = EXCLUDED.trips, completed_at = NOW()
            "#,
        )
        .bind(locator)
        .bind(trips as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset(&self) -> StoreResult<()> {
        sqlx::query("TRUNCATE stations, trip_edges, ingest_counters, processed_files")
            .execute(&self.pool)
            .await?;
        info!("Graph reset");
        Ok(())
    }

    async fn vitals(&self) -> StoreResult<Vitals> {
        let (trips, stations, edges): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE((SELECT value FROM ingest_counters WHERE name = $1), 0),
                (SELECT COUNT(*) FROM stations),
                (SELECT COUNT(*) FROM trip_edges)
            "#,
        )
        .bind(TRIP_COUNTER)
        .fetch_one(&self.pool)
        .await?;

        Ok(Vitals {
            trips,
            stations,
            edges,
        })
    }
}

/// A worker's dedicated connection and its unacknowledged commands
#[derive(Debug)]
pub struct PgStoreConnection {
    conn: Option<PgConnection>,
    pipeline: Vec<Mutation>,
}

/// One flush worth of commands, merged per row and sorted by key
///
/// Edge deltas are summed per `(src, dst)` before upserting, since one
/// statement may not touch the same row twice. Row locks are taken in key
/// order (stations, then edges, then counters) so concurrent flushes never
/// deadlock.
#[derive(Debug, Default, PartialEq)]
struct Batch<'a> {
    stations: BTreeMap<StationId, &'a Station>,
    edges: BTreeMap<(StationId, StationId), EdgeCounts>,
    counters: BTreeMap<&'static str, i64>,
}

impl<'a> Batch<'a> {
    fn group(pipeline: &'a [Mutation]) -> Self {
        let mut batch = Batch::default();
        for mutation in pipeline {
            match mutation {
                Mutation::CreateStation(station) => {
                    batch.stations.entry(station.id).or_insert(station);
                },
                Mutation::IncrementEdge { src, dst, bucket } => {
                    batch
                        .edges
                        .entry((*src, *dst))
                        .and_modify(|counts| counts.increment(*bucket))
                        .or_insert_with(|| EdgeCounts::first_trip(*bucket));
                },
                Mutation::IncrementCounter { name, by } => {
                    *batch.counters.entry(*name).or_insert(0) += by;
                },
            }
        }
        batch
    }

    async fn apply(&self, conn: &mut PgConnection) -> StoreResult<()> {
        let stations: Vec<&Station> = self.stations.values().copied().collect();
        for chunk in stations.chunks(STATION_CHUNK_SIZE) {
            let mut query_builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO stations (id, name, latitude, longitude) ",
            );
            query_builder.push_values(chunk, |mut b, station| {
                b.push_bind(station.id.get())
                    .push_bind(&station.name)
                    .push_bind(station.location.latitude)
                    .push_bind(station.location.longitude);
            });
            query_builder.push(" ON CONFLICT (id) DO NOTHING");

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(rejected(MutationKind::CreateStation))?;
        }

        if !self.edges.is_empty() {
            let mut srcs = Vec::with_capacity(self.edges.len());
            let mut dsts = Vec::with_capacity(self.edges.len());
            let mut deltas = Vec::with_capacity(self.edges.len() * HOURS_PER_WEEK);
            for ((src, dst), counts) in &self.edges {
                srcs.push(src.get());
                dsts.push(dst.get());
                deltas.extend_from_slice(counts.as_slice());
            }

            sqlx::query(UPSERT_EDGES)
                .bind(srcs)
                .bind(dsts)
                .bind(deltas)
                .execute(&mut *conn)
                .await
                .map_err(rejected(MutationKind::IncrementEdge))?;
        }

        for (name, by) in &self.counters {
            sqlx::query(INCREMENT_COUNTER)
                .bind(*name)
                .bind(*by)
                .execute(&mut *conn)
                .await
                .map_err(rejected(MutationKind::IncrementCounter))?;
        }

        debug!(
            stations = self.stations.len(),
            edges = self.edges.len(),
            counters = self.counters.len(),
            "Batch applied"
        );
        Ok(())
    }
}

fn rejected(kind: MutationKind) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::Rejected { kind, source }
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    fn send(&mut self, mutation: Mutation) -> StoreResult<()> {
        if self.conn.is_none() {
            return Err(StoreError::Closed);
        }
        self.pipeline.push(mutation);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pipeline.len()
    }

    async fn flush(&mut self) -> StoreResult<()> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let batch = Batch::group(&self.pipeline);

        let mut tx = conn.begin().await?;
        batch.apply(&mut *tx).await?;
        tx.commit().await?;

        debug!(commands = self.pipeline.len(), "Transaction committed");
        self.pipeline.clear();
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.pipeline.clear();
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}
