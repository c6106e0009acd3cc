pub mod machine;
pub mod prefs;
pub mod repo;
pub mod state;
pub mod trips;

pub use machine::TripError;
pub use repo::{MeterRepository, RepoError};
pub use state::{MeterStores, StateCell};
pub use trips::{MemoryTripStore, SqliteTripStore, TripStore, TripStoreError};
