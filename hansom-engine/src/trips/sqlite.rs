use std::path::Path;

use async_trait::async_trait;
use hansom_core::{TripData, TripId};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use ulid::Ulid;

use crate::trips::{TripStore, TripStoreError};

#[derive(Clone)]
pub struct SqliteTripStore {
    pool: SqlitePool,
}

impl SqliteTripStore {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, TripStoreError> {
        let database_url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await?;

        // enable WAL for better concurrency
        sqlx::query("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), TripStoreError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    fn row_to_trip(row: &SqliteRow) -> Result<TripData, TripStoreError> {
        let id_str: String = row.try_get("id")?;
        let id = Ulid::from_string(&id_str)
            .map_err(|e| TripStoreError::Internal(format!("bad trip id {id_str}: {e}")))?;

        let started_ms: i64 = row.try_get("started_at")?;
        let started_at = jiff::Timestamp::from_millisecond(started_ms)
            .map_err(|e| TripStoreError::Internal(format!("bad start timestamp: {e}")))?;

        let ended_ms: Option<i64> = row.try_get("ended_at")?;
        let ended_at = match ended_ms {
            None => None,
            Some(ms) => Some(
                jiff::Timestamp::from_millisecond(ms)
                    .map_err(|e| TripStoreError::Internal(format!("bad end timestamp: {e}")))?,
            ),
        };

        let fare_cents: i64 = row.try_get("fare_cents")?;
        let extras_cents: i64 = row.try_get("extras_cents")?;
        let wait_secs: i64 = row.try_get("wait_secs")?;
        let distance_m: i64 = row.try_get("distance_m")?;

        Ok(TripData {
            id: TripId(id),
            started_at,
            ended_at,
            fare_cents: fare_cents as u64,
            extras_cents: extras_cents as u64,
            wait_secs: wait_secs as u64,
            distance_m: distance_m as u32,
        })
    }
}

#[async_trait]
impl TripStore for SqliteTripStore {
    async fn upsert(&self, trip: &TripData) -> Result<(), TripStoreError> {
        sqlx::query(
            "INSERT INTO trips (id, started_at, ended_at, fare_cents, extras_cents, wait_secs, distance_m)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 started_at = excluded.started_at,
                 ended_at = excluded.ended_at,
                 fare_cents = excluded.fare_cents,
                 extras_cents = excluded.extras_cents,
                 wait_secs = excluded.wait_secs,
                 distance_m = excluded.distance_m",
        )
        .bind(trip.id.0.to_string())
        .bind(trip.started_at.as_millisecond())
        .bind(trip.ended_at.map(|t| t.as_millisecond()))
        .bind(trip.fare_cents as i64)
        .bind(trip.extras_cents as i64)
        .bind(trip.wait_secs as i64)
        .bind(i64::from(trip.distance_m))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: TripId) -> Result<Option<TripData>, TripStoreError> {
        let row = sqlx::query("SELECT * FROM trips WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_trip).transpose()
    }

    async fn recent(&self, limit: u32) -> Result<Vec<TripData>, TripStoreError> {
        let rows = sqlx::query("SELECT * FROM trips ORDER BY started_at DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_trip).collect()
    }

    async fn ongoing(&self) -> Result<Option<TripData>, TripStoreError> {
        let row = sqlx::query(
            "SELECT * FROM trips WHERE ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_trip).transpose()
    }

    async fn clear_all(&self) -> Result<u64, TripStoreError> {
        let result = sqlx::query("DELETE FROM trips").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
