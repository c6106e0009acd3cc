//! Full-stack smoke test: repository facade → link → simulated MCU.

use std::sync::Arc;
use std::time::Duration;

use hansom_engine::{MemoryTripStore, MeterRepository, MeterStores};
use hansom_link::McuLink;
use hansomd::mock;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn mock_meter_completes_a_hire_cycle() {
    let (host_side, sim_side) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    tokio::spawn(mock::run(sim_side, cancel.clone()));

    let (link, events) = McuLink::start(host_side, cancel.clone());
    let stores = MeterStores::new();
    let trips = Arc::new(MemoryTripStore::new());
    let repo = MeterRepository::start(
        Arc::clone(&stores),
        Arc::clone(&trips),
        link,
        events,
        cancel.clone(),
    );

    // Provisioning: the enquiry answer carries identity and parameters.
    repo.enquire_parameters().await.unwrap();
    wait_until(|| stores.device.current().identity.is_some()).await;

    repo.update_k_value(2000).await.unwrap();
    wait_until(|| stores.params.current().k_value == 2000).await;

    let id = repo.start_trip().await.unwrap();

    // Let the simulated cab drive for a while.
    let mut driven = 0;
    while stores.trip.current().trip.as_ref().map(|t| t.distance_m).unwrap_or(0) == 0 {
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        driven += 10;
        assert!(driven < 600, "simulator produced no distance");
    }

    let ended = repo.end_trip().await.unwrap();
    assert_eq!(ended.id, id);
    assert!(ended.distance_m > 0);
    assert!(ended.fare_cents >= u64::from(stores.params.current().start_cents));

    let stored = trips.get(id).await.unwrap().expect("trip persisted");
    assert_eq!(stored, ended);

    repo.stop_communication();
    assert!(cancel.is_cancelled());
}

async fn wait_until(pred: impl Fn() -> bool) {
    for _ in 0..200 {
        if pred() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
