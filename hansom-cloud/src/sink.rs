//! Cloud synchronization boundary.
//!
//! The backend stores documents in named collections keyed by meter
//! identifier. Two rules hold for every write: `server_time` is always a
//! sentinel the backend resolves to its own clock, never a device value;
//! and nested `{seconds, nanoseconds}` maps are converted to native
//! timestamps before the document leaves the device.

use async_trait::async_trait;
use hansom_core::TripData;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

/// Marker the backend replaces with a server-assigned timestamp.
pub const SERVER_TIME_SENTINEL: &str = "__server_time__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Trips,
    Meters,
    Heartbeat,
    Loggings,
    AuditTrail,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Trips => "trips",
            Self::Meters => "meters",
            Self::Heartbeat => "heartbeat",
            Self::Loggings => "loggings",
            Self::AuditTrail => "audit_trail",
        }
    }
}

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait CloudSink: Send + Sync {
    /// Write `document` under `key` into `collection`. Implementations must
    /// call [`normalize_timestamps`] before the bytes leave the device.
    async fn publish(
        &self,
        collection: Collection,
        key: &str,
        document: Value,
    ) -> Result<(), CloudError>;
}

/// Stand-in sink that logs every publish. Used until a real backend is
/// wired, and in tests.
#[derive(Default)]
pub struct LoggingCloudSink;

#[async_trait]
impl CloudSink for LoggingCloudSink {
    async fn publish(
        &self,
        collection: Collection,
        key: &str,
        mut document: Value,
    ) -> Result<(), CloudError> {
        normalize_timestamps(&mut document);
        info!(collection = collection.name(), key, %document, "cloud publish");
        Ok(())
    }
}

/// Completed-trip document for the `trips` collection.
pub fn trip_document(meter_id: &str, trip: &TripData) -> Value {
    json!({
        "meter_id": meter_id,
        "trip_id": trip.id.0.to_string(),
        "started_at": trip.started_at.to_string(),
        "ended_at": trip.ended_at.map(|t| t.to_string()),
        "fare_cents": trip.fare_cents,
        "extras_cents": trip.extras_cents,
        "total_cents": trip.total_cents(),
        "wait_secs": trip.wait_secs,
        "distance_m": trip.distance_m,
        "server_time": SERVER_TIME_SENTINEL,
    })
}

/// Liveness document for the `heartbeat` collection.
pub fn heartbeat_document(meter_id: &str, mode: &str) -> Value {
    json!({
        "meter_id": meter_id,
        "mode": mode,
        "server_time": SERVER_TIME_SENTINEL,
    })
}

/// Parse a `{seconds, nanoseconds}` map (and nothing else) into a native
/// timestamp.
pub fn timestamp_from_map(value: &Value) -> Option<jiff::Timestamp> {
    let map = value.as_object()?;
    if map.len() != 2 {
        return None;
    }
    let seconds = map.get("seconds")?.as_i64()?;
    let nanos = map.get("nanoseconds")?.as_i64()?;
    jiff::Timestamp::new(seconds, i32::try_from(nanos).ok()?).ok()
}

/// Recursively replace `{seconds, nanoseconds}` maps with RFC 3339 strings.
pub fn normalize_timestamps(value: &mut Value) {
    if let Some(ts) = timestamp_from_map(value) {
        *value = Value::String(ts.to_string());
        return;
    }
    match value {
        Value::Object(map) => {
            for nested in map.values_mut() {
                normalize_timestamps(nested);
            }
        }
        Value::Array(items) => {
            for nested in items.iter_mut() {
                normalize_timestamps(nested);
            }
        }
        _ => {}
    }
}
