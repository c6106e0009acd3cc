use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod tariff;

pub use tariff::MeterTariff;

type BoxStr = Box<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripId(pub Ulid);

impl TripId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TripId {
    fn default() -> Self {
        Self::new()
    }
}

/// One hire cycle. `ended_at == None` marks the ongoing trip; at most one
/// such row exists in the trip store at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripData {
    pub id: TripId,
    pub started_at: jiff::Timestamp,
    pub ended_at: Option<jiff::Timestamp>,
    pub fare_cents: u64,
    pub extras_cents: u64,
    pub wait_secs: u64,
    pub distance_m: u32,
}

impl TripData {
    /// Fresh trip with zeroed accumulators, started now.
    pub fn begin(started_at: jiff::Timestamp) -> Self {
        Self {
            id: TripId::new(),
            started_at,
            ended_at: None,
            fare_cents: 0,
            extras_cents: 0,
            wait_secs: 0,
            distance_m: 0,
        }
    }

    pub fn total_cents(&self) -> u64 {
        self.fare_cents + self.extras_cents
    }

    pub fn is_ongoing(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Device identity as reported by the MCU. The local copy is a cache,
/// overwritten on each identity event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial: BoxStr,
    pub license_plate: BoxStr,
}

/// External storage media state, set from platform broadcast events.
/// Informational; the trip engine never acts on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMediaStatus {
    Attached,
    Detached,
    Mounted,
    Unmounted,
    #[default]
    Unknown,
}

/// The meter's externally visible operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterMode {
    #[default]
    ForHire,
    Hired,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockupReason {
    AbnormalPulse,
    OverSpeed,
}

/// Safety latch raised by the MCU. Halts fare accrual until an operator
/// explicitly clears it; never auto-clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockup {
    pub reason: LockupReason,
    pub since: jiff::Timestamp,
}

/// Runtime device state published by the device store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceData {
    pub identity: Option<DeviceIdentity>,
    pub acc_on: bool,
    pub mcu_time: Option<jiff::Timestamp>,
    pub storage: StorageMediaStatus,
}

/// What the trip state store publishes on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub mode: MeterMode,
    pub trip: Option<TripData>,
    pub last_completed: Option<TripData>,
    pub lockup: Option<Lockup>,
}
