//! Durable trip storage.
//!
//! Keyed by [`TripId`], upsert semantics, queryable by recency and by the
//! single ongoing row. `MemoryTripStore` is the reference implementation and
//! test double; `SqliteTripStore` is what the device runs.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTripStore;
pub use sqlite::SqliteTripStore;

use async_trait::async_trait;
use hansom_core::{TripData, TripId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TripStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("storage internal: {0}")]
    Internal(String),
}

#[async_trait]
pub trait TripStore: Send + Sync + 'static {
    /// Insert or replace by trip id. Idempotent: re-applying the same value
    /// leaves one row with identical content.
    async fn upsert(&self, trip: &TripData) -> Result<(), TripStoreError>;

    async fn get(&self, id: TripId) -> Result<Option<TripData>, TripStoreError>;

    /// Newest-first by start time.
    async fn recent(&self, limit: u32) -> Result<Vec<TripData>, TripStoreError>;

    /// The single trip with no end time, if any. If the invariant was ever
    /// violated by external writes, the newest open row wins.
    async fn ongoing(&self) -> Result<Option<TripData>, TripStoreError>;

    /// Bulk wipe, used for administrative reset. Returns rows removed.
    async fn clear_all(&self) -> Result<u64, TripStoreError>;
}
