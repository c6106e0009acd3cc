//! Repository facade.
//!
//! The only entry point external collaborators use. Trip operations
//! round-trip through the state machine task and report accepted/rejected;
//! configuration operations validate, send the MCU command, await its
//! acknowledgement, then refresh the tariff store with a parameter enquiry.
//! Everything else is observed through the state cells' change streams.

use std::sync::Arc;

use hansom_core::{MeterTariff, StorageMediaStatus, TripData, TripId};
use hansom_link::{LinkError, McuCommand, McuEvent, McuHandle};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::machine::{Machine, Op, OP_QUEUE_DEPTH, TripError};
use crate::state::MeterStores;
use crate::trips::{TripStore, TripStoreError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Trip(#[from] TripError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("no trip to print")]
    NothingToPrint,
}

pub struct MeterRepository<S> {
    stores: Arc<MeterStores>,
    trips: Arc<S>,
    link: McuHandle,
    ops: mpsc::Sender<Op>,
    cancel: CancellationToken,
    store_rev: watch::Receiver<u64>,
}

impl<S: TripStore> MeterRepository<S> {
    /// Wire the stores, trip store and peripheral link together and spawn
    /// the state machine task. `events` is the link's event stream; the
    /// machine consumes it until `cancel` fires.
    pub fn start(
        stores: Arc<MeterStores>,
        trips: Arc<S>,
        link: McuHandle,
        events: mpsc::Receiver<McuEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (op_tx, op_rx) = mpsc::channel(OP_QUEUE_DEPTH);
        let (rev_tx, rev_rx) = watch::channel(0);

        let machine = Machine::new(
            Arc::clone(&stores),
            Arc::clone(&trips),
            op_rx,
            events,
            cancel.clone(),
            rev_tx,
        );
        tokio::spawn(machine.run());

        Self {
            stores,
            trips,
            link,
            ops: op_tx,
            cancel,
            store_rev: rev_rx,
        }
    }

    pub fn stores(&self) -> &MeterStores {
        &self.stores
    }

    /// Trip history queries go straight to the store.
    pub fn trips(&self) -> &S {
        &self.trips
    }

    /// Bumped after every successful trip-store write; subscribe to know
    /// when to re-run history queries.
    pub fn observe_trip_log(&self) -> watch::Receiver<u64> {
        self.store_rev.clone()
    }

    // ── Trip lifecycle ───────────────────────────────────────────────────

    pub async fn start_trip(&self) -> Result<TripId, TripError> {
        self.op(Op::StartTrip).await
    }

    pub async fn pause_trip(&self) -> Result<(), TripError> {
        self.op(Op::PauseTrip).await
    }

    pub async fn resume_trip(&self) -> Result<(), TripError> {
        self.op(Op::ResumeTrip).await
    }

    pub async fn end_trip(&self) -> Result<TripData, TripError> {
        self.op(Op::EndTrip).await
    }

    /// `cents` is in minor currency units; zero is a no-op but accepted.
    pub async fn add_extras(&self, cents: u64) -> Result<(), TripError> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(Op::AddExtras { cents, reply: tx })
            .await
            .map_err(|_| TripError::Stopped)?;
        rx.await.map_err(|_| TripError::Stopped)?
    }

    /// Administrative action releasing a safety lockup.
    pub async fn clear_lockup(&self) -> Result<(), TripError> {
        self.op(Op::ClearLockup).await
    }

    /// Informational only; forwarded to the device store.
    pub async fn note_storage_status(&self, status: StorageMediaStatus) {
        let _ = self.ops.send(Op::NoteStorageStatus(status)).await;
    }

    /// Administrative reset: wipe the trip log. An ongoing trip survives in
    /// memory and is re-persisted on its next flush.
    pub async fn clear_all_trips(&self) -> Result<u64, TripStoreError> {
        self.trips.clear_all().await
    }

    // ── Peripheral configuration ─────────────────────────────────────────

    pub async fn update_k_value(&self, k_value: u32) -> Result<(), LinkError> {
        self.configure(McuCommand::SetKValue(k_value)).await
    }

    pub async fn update_license_plate(&self, plate: &str) -> Result<(), LinkError> {
        self.configure(McuCommand::SetLicensePlate(plate.to_owned()))
            .await
    }

    pub async fn update_price_params(
        &self,
        start_cents: u32,
        step_cents: u32,
        step2_cents: u32,
        threshold_m: u32,
    ) -> Result<(), LinkError> {
        self.configure(McuCommand::SetPriceParams {
            start_cents,
            step_cents,
            step2_cents,
            threshold_m,
        })
        .await
    }

    pub async fn update_mcu_params(&self, tariff: MeterTariff) -> Result<(), LinkError> {
        self.configure(McuCommand::UpdateMcuParams(tariff)).await
    }

    pub async fn enquire_parameters(&self) -> Result<(), LinkError> {
        self.link.command(&McuCommand::EnquireParameters).await
    }

    /// Print the ongoing trip, or the last completed one.
    pub async fn print_receipt(&self) -> Result<(), RepoError> {
        let snapshot = self.stores.trip.current();
        let Some(trip) = snapshot.trip.or(snapshot.last_completed) else {
            return Err(RepoError::NothingToPrint);
        };
        self.link.command(&McuCommand::PrintReceipt(trip)).await?;
        Ok(())
    }

    /// Tear down the session: cancels the link and the machine task.
    /// In-flight command awaits resolve as closed, not as success.
    pub fn stop_communication(&self) {
        self.cancel.cancel();
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn op<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, TripError>>) -> Op,
    ) -> Result<T, TripError> {
        let (tx, rx) = oneshot::channel();
        self.ops.send(make(tx)).await.map_err(|_| TripError::Stopped)?;
        rx.await.map_err(|_| TripError::Stopped)?
    }

    /// Send a configuration command; on acceptance, ask the MCU for the
    /// authoritative parameter table so the tariff store is replaced
    /// wholesale by the resulting event.
    async fn configure(&self, cmd: McuCommand) -> Result<(), LinkError> {
        self.link.command(&cmd).await?;
        self.link.command(&McuCommand::EnquireParameters).await
    }
}
