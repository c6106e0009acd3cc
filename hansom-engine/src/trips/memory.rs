use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hansom_core::{TripData, TripId};

use crate::trips::{TripStore, TripStoreError};

/// In-memory trip store. Primarily intended for tests and as a reference
/// implementation of the TripStore trait.
#[derive(Clone, Default)]
pub struct MemoryTripStore {
    trips: Arc<Mutex<HashMap<TripId, TripData>>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TripId, TripData>>, TripStoreError> {
        self.trips
            .lock()
            .map_err(|_| TripStoreError::Internal("trips mutex poisoned".into()))
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn upsert(&self, trip: &TripData) -> Result<(), TripStoreError> {
        let mut map = self.lock()?;
        map.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn get(&self, id: TripId) -> Result<Option<TripData>, TripStoreError> {
        let map = self.lock()?;
        Ok(map.get(&id).cloned())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<TripData>, TripStoreError> {
        let map = self.lock()?;
        let mut trips: Vec<TripData> = map.values().cloned().collect();
        trips.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        trips.truncate(limit as usize);
        Ok(trips)
    }

    async fn ongoing(&self) -> Result<Option<TripData>, TripStoreError> {
        let map = self.lock()?;
        Ok(map
            .values()
            .filter(|t| t.is_ongoing())
            .max_by_key(|t| t.started_at)
            .cloned())
    }

    async fn clear_all(&self) -> Result<u64, TripStoreError> {
        let mut map = self.lock()?;
        let removed = map.len() as u64;
        map.clear();
        Ok(removed)
    }
}
