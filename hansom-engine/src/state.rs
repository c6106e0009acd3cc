//! Shared state stores.
//!
//! Each [`StateCell`] holds the latest snapshot of one piece of meter state.
//! Writers serialize on an internal lock; readers take non-blocking
//! snapshots or subscribe for replay-1 change notifications. The cells are
//! constructed once at the application root and handed to the components
//! that need them — there is no global state.

use std::sync::Arc;

use hansom_core::{DeviceData, MeterTariff, TripSnapshot};
use tokio::sync::{Mutex, watch};

pub struct StateCell<T> {
    tx: watch::Sender<T>,
    write_lock: Mutex<()>,
}

impl<T: Clone + Send + Sync> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Non-blocking snapshot of the last-set value.
    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the held value.
    pub async fn set(&self, value: T) {
        let _guard = self.write_lock.lock().await;
        self.tx.send_replace(value);
    }

    /// Read-modify-write with the writer lock held across the whole cycle,
    /// so readers observe either the old or the new value, never a partial
    /// update.
    pub async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut T),
    {
        let _guard = self.write_lock.lock().await;
        let mut value = self.tx.borrow().clone();
        mutate(&mut value);
        self.tx.send_replace(value);
    }

    /// Subscribe to changes. The receiver's `borrow()` yields the current
    /// value immediately; `changed()` wakes on every subsequent assignment,
    /// coalescing to last-write-wins between reads.
    pub fn observe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// The three process-wide stores: trip state, device runtime data, tariff
/// parameters. One instance per application, shared by reference.
pub struct MeterStores {
    pub trip: StateCell<TripSnapshot>,
    pub device: StateCell<DeviceData>,
    pub params: StateCell<MeterTariff>,
}

impl MeterStores {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            trip: StateCell::new(TripSnapshot::default()),
            device: StateCell::new(DeviceData::default()),
            params: StateCell::new(MeterTariff::default()),
        })
    }
}
