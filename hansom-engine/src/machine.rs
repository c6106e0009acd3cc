//! Trip state machine.
//!
//! A single task owns every transition between ForHire, Hired and Paused,
//! reconciles the MCU's free-running pulse counter against the ongoing
//! [`TripData`], latches safety lockups, and is the sole writer of the three
//! shared state cells. Operations arrive over a channel with a oneshot
//! reply; MCU events arrive from the peripheral link; persistence is
//! debounced onto a flush tick and forced on every transition.

use std::sync::Arc;
use std::time::Duration;

use hansom_core::{
    Lockup, LockupReason, MeterMode, StorageMediaStatus, TripData, TripId, TripSnapshot,
};
use hansom_link::McuEvent;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::MeterStores;
use crate::trips::TripStore;

pub(crate) const OP_QUEUE_DEPTH: usize = 16;

const WAIT_TICK: Duration = Duration::from_secs(1);
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TripError {
    #[error("{op} rejected: meter is {mode:?}")]
    InvalidState { op: &'static str, mode: MeterMode },
    #[error("meter locked up ({0:?}); clear the lockup first")]
    LockedUp(LockupReason),
    #[error("no lockup to clear")]
    NotLockedUp,
    #[error("trip engine stopped")]
    Stopped,
}

/// Operations the facade routes to the machine task.
pub(crate) enum Op {
    StartTrip(oneshot::Sender<Result<TripId, TripError>>),
    PauseTrip(oneshot::Sender<Result<(), TripError>>),
    ResumeTrip(oneshot::Sender<Result<(), TripError>>),
    EndTrip(oneshot::Sender<Result<TripData, TripError>>),
    AddExtras {
        cents: u64,
        reply: oneshot::Sender<Result<(), TripError>>,
    },
    ClearLockup(oneshot::Sender<Result<(), TripError>>),
    NoteStorageStatus(StorageMediaStatus),
}

pub(crate) struct Machine<S> {
    stores: Arc<MeterStores>,
    trips: Arc<S>,
    ops: mpsc::Receiver<Op>,
    events: mpsc::Receiver<McuEvent>,
    cancel: CancellationToken,
    /// Bumped after every successful trip-store write; lets observers
    /// re-query trip history without polling.
    store_rev: watch::Sender<u64>,

    mode: MeterMode,
    trip: Option<TripData>,
    last_completed: Option<TripData>,
    lockup: Option<Lockup>,

    /// Pulse count at the point accrual (re)started; None until the first
    /// pulse after start/resume/clear re-seats it.
    pulse_anchor: Option<u32>,
    last_pulse_count: Option<u32>,
    /// Distance accumulated before the current anchor window.
    distance_base_m: u32,

    dirty: bool,
    retry_queue: Vec<TripData>,
}

impl<S: TripStore> Machine<S> {
    pub(crate) fn new(
        stores: Arc<MeterStores>,
        trips: Arc<S>,
        ops: mpsc::Receiver<Op>,
        events: mpsc::Receiver<McuEvent>,
        cancel: CancellationToken,
        store_rev: watch::Sender<u64>,
    ) -> Self {
        Self {
            stores,
            trips,
            ops,
            events,
            cancel,
            store_rev,
            mode: MeterMode::ForHire,
            trip: None,
            last_completed: None,
            lockup: None,
            pulse_anchor: None,
            last_pulse_count: None,
            distance_base_m: 0,
            dirty: false,
            retry_queue: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.recover_ongoing_trip().await;
        self.publish_trip().await;

        let mut wait_tick = tokio::time::interval(WAIT_TICK);
        let mut flush_tick = tokio::time::interval(FLUSH_INTERVAL);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                op = self.ops.recv() => match op {
                    Some(op) => self.handle_op(op).await,
                    None => break,
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("mcu event stream ended");
                        events_open = false;
                    }
                },
                _ = wait_tick.tick() => self.on_wait_tick().await,
                _ = flush_tick.tick() => self.flush().await,
            }
        }

        self.flush().await;
        info!("trip machine stopped");
    }

    /// Adopt a trip left open by a previous process (power loss mid-hire).
    async fn recover_ongoing_trip(&mut self) {
        match self.trips.ongoing().await {
            Ok(Some(trip)) => {
                info!(trip_id = ?trip.id, "recovered ongoing trip, resuming as hired");
                self.distance_base_m = trip.distance_m;
                self.trip = Some(trip);
                self.mode = MeterMode::Hired;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not query ongoing trip at startup"),
        }
    }

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::StartTrip(reply) => {
                let _ = reply.send(self.start_trip().await);
            }
            Op::PauseTrip(reply) => {
                let _ = reply.send(self.pause_trip().await);
            }
            Op::ResumeTrip(reply) => {
                let _ = reply.send(self.resume_trip().await);
            }
            Op::EndTrip(reply) => {
                let _ = reply.send(self.end_trip().await);
            }
            Op::AddExtras { cents, reply } => {
                let _ = reply.send(self.add_extras(cents).await);
            }
            Op::ClearLockup(reply) => {
                let _ = reply.send(self.clear_lockup().await);
            }
            Op::NoteStorageStatus(status) => {
                self.stores.device.update(|d| d.storage = status).await;
            }
        }
    }

    async fn start_trip(&mut self) -> Result<TripId, TripError> {
        if let Some(lockup) = self.lockup {
            return Err(TripError::LockedUp(lockup.reason));
        }
        if self.mode != MeterMode::ForHire {
            return Err(TripError::InvalidState {
                op: "start_trip",
                mode: self.mode,
            });
        }

        let trip = TripData::begin(jiff::Timestamp::now());
        let id = trip.id;
        info!(trip_id = ?id, "trip started");

        self.mode = MeterMode::Hired;
        self.distance_base_m = 0;
        self.pulse_anchor = self.last_pulse_count;
        self.trip = Some(trip);
        self.dirty = true;
        self.flush().await;
        self.publish_trip().await;
        Ok(id)
    }

    async fn pause_trip(&mut self) -> Result<(), TripError> {
        if self.mode != MeterMode::Hired {
            return Err(TripError::InvalidState {
                op: "pause_trip",
                mode: self.mode,
            });
        }

        self.fold_distance();
        self.mode = MeterMode::Paused;
        self.dirty = true;
        self.flush().await;
        self.publish_trip().await;
        debug!("trip paused");
        Ok(())
    }

    async fn resume_trip(&mut self) -> Result<(), TripError> {
        if self.mode != MeterMode::Paused {
            return Err(TripError::InvalidState {
                op: "resume_trip",
                mode: self.mode,
            });
        }

        self.mode = MeterMode::Hired;
        // Re-seat the anchor on the next pulse so distance covered while
        // paused is never billed.
        self.pulse_anchor = None;
        self.dirty = true;
        self.flush().await;
        self.publish_trip().await;
        debug!("trip resumed");
        Ok(())
    }

    async fn end_trip(&mut self) -> Result<TripData, TripError> {
        if !matches!(self.mode, MeterMode::Hired | MeterMode::Paused) {
            return Err(TripError::InvalidState {
                op: "end_trip",
                mode: self.mode,
            });
        }
        let Some(mut trip) = self.trip.take() else {
            return Err(TripError::InvalidState {
                op: "end_trip",
                mode: self.mode,
            });
        };

        trip.ended_at = Some(jiff::Timestamp::now());
        info!(
            trip_id = ?trip.id,
            fare_cents = trip.fare_cents,
            total_cents = trip.total_cents(),
            distance_m = trip.distance_m,
            "trip ended"
        );

        self.mode = MeterMode::ForHire;
        self.pulse_anchor = None;
        self.distance_base_m = 0;
        self.dirty = false;

        if let Err(e) = self.trips.upsert(&trip).await {
            warn!(error = %e, trip_id = ?trip.id, "final trip persist failed, queued for retry");
            self.retry_queue.push(trip.clone());
        } else {
            self.bump_store_rev();
        }

        self.last_completed = Some(trip.clone());
        self.publish_trip().await;
        Ok(trip)
    }

    async fn add_extras(&mut self, cents: u64) -> Result<(), TripError> {
        if !matches!(self.mode, MeterMode::Hired | MeterMode::Paused) {
            return Err(TripError::InvalidState {
                op: "add_extras",
                mode: self.mode,
            });
        }
        let Some(trip) = self.trip.as_mut() else {
            return Err(TripError::InvalidState {
                op: "add_extras",
                mode: self.mode,
            });
        };

        trip.extras_cents = trip.extras_cents.saturating_add(cents);
        self.dirty = true;
        self.flush().await;
        self.publish_trip().await;
        Ok(())
    }

    async fn clear_lockup(&mut self) -> Result<(), TripError> {
        let Some(lockup) = self.lockup.take() else {
            return Err(TripError::NotLockedUp);
        };

        let held_for = jiff::Timestamp::now().duration_since(lockup.since);
        info!(reason = ?lockup.reason, held_secs = held_for.as_secs(), "lockup cleared");

        // Movement during the lockup is never billed.
        self.pulse_anchor = None;
        self.publish_trip().await;
        Ok(())
    }

    async fn handle_event(&mut self, event: McuEvent) {
        match event {
            McuEvent::PulseCount(count) => self.on_pulse(count).await,
            McuEvent::FareParams(tariff) => {
                debug!(?tariff, "fare parameters replaced");
                self.stores.params.set(tariff).await;
                // Re-derive fare now that the authoritative table arrived.
                self.recompute_fare().await;
            }
            McuEvent::DeviceId(identity) => {
                self.stores.device.update(|d| d.identity = Some(identity)).await;
            }
            McuEvent::TimeSync(ts) => {
                self.stores.device.update(|d| d.mcu_time = Some(ts)).await;
            }
            McuEvent::AccStatus(on) => {
                self.stores.device.update(|d| d.acc_on = on).await;
            }
            McuEvent::AbnormalPulse => self.latch_lockup(LockupReason::AbnormalPulse).await,
            McuEvent::OverSpeed { speed_dkmh } => {
                warn!(speed_dkmh, "over-speed reported");
                self.latch_lockup(LockupReason::OverSpeed).await;
            }
            // Acks are resolved inside the link; malformed frames are
            // dropped there too.
            McuEvent::Ack { .. } | McuEvent::Malformed => {}
        }
    }

    async fn on_pulse(&mut self, count: u32) {
        let previous = self.last_pulse_count.replace(count);

        if self.lockup.is_some() || self.mode != MeterMode::Hired {
            return;
        }
        if self.trip.is_none() {
            return;
        }

        let anchor = match self.pulse_anchor {
            Some(anchor) => anchor,
            None => {
                // First pulse since accrual (re)started: bill from the
                // previously observed count if we have one, else from here.
                let anchor = previous.unwrap_or(count);
                self.pulse_anchor = Some(anchor);
                anchor
            }
        };

        if count < anchor {
            warn!(count, anchor, "pulse counter regressed, re-anchoring");
            self.fold_distance();
            self.pulse_anchor = Some(count);
            return;
        }

        let tariff = self.stores.params.current();
        let windowed = tariff.distance_m(count - anchor);
        let distance = self.distance_base_m.saturating_add(windowed);

        let Some(trip) = self.trip.as_mut() else {
            return;
        };
        if distance > trip.distance_m {
            trip.distance_m = distance;
            self.dirty = true;
        }
        let fare = tariff.fare_cents(trip.distance_m);
        if fare > trip.fare_cents {
            trip.fare_cents = fare;
            self.dirty = true;
        }
        if self.dirty {
            self.publish_trip().await;
        }
    }

    /// Re-derive fare from the current tariff, keeping it non-decreasing
    /// within the trip.
    async fn recompute_fare(&mut self) {
        if self.lockup.is_some() || self.mode != MeterMode::Hired {
            return;
        }
        let tariff = self.stores.params.current();
        let Some(trip) = self.trip.as_mut() else {
            return;
        };
        let fare = tariff.fare_cents(trip.distance_m);
        if fare > trip.fare_cents {
            trip.fare_cents = fare;
            self.dirty = true;
            self.publish_trip().await;
        }
    }

    async fn latch_lockup(&mut self, reason: LockupReason) {
        if let Some(existing) = self.lockup {
            debug!(?reason, held = ?existing.reason, "lockup already latched");
            return;
        }
        warn!(?reason, "lockup latched, fare accrual halted");

        self.fold_distance();
        self.lockup = Some(Lockup {
            reason,
            since: jiff::Timestamp::now(),
        });
        self.flush().await;
        self.publish_trip().await;
    }

    async fn on_wait_tick(&mut self) {
        if self.mode != MeterMode::Paused {
            return;
        }
        let Some(trip) = self.trip.as_mut() else {
            return;
        };
        trip.wait_secs += 1;
        self.dirty = true;
        self.publish_trip().await;
    }

    /// Fold the current anchor window into the accumulated distance and
    /// drop the anchor. Called whenever accrual stops.
    fn fold_distance(&mut self) {
        if let Some(trip) = self.trip.as_ref() {
            self.distance_base_m = trip.distance_m;
        }
        self.pulse_anchor = None;
    }

    /// Persist the dirty ongoing trip and retry any queued final writes.
    /// Failures keep state in memory; nothing is ever forgotten.
    async fn flush(&mut self) {
        if !self.retry_queue.is_empty() {
            let queued = std::mem::take(&mut self.retry_queue);
            for trip in queued {
                match self.trips.upsert(&trip).await {
                    Ok(()) => self.bump_store_rev(),
                    Err(e) => {
                        warn!(error = %e, trip_id = ?trip.id, "retried persist failed");
                        self.retry_queue.push(trip);
                    }
                }
            }
        }

        if !self.dirty {
            return;
        }
        let Some(trip) = self.trip.clone() else {
            self.dirty = false;
            return;
        };
        match self.trips.upsert(&trip).await {
            Ok(()) => {
                self.dirty = false;
                self.bump_store_rev();
            }
            Err(e) => {
                warn!(error = %e, trip_id = ?trip.id, "trip persist failed, will retry");
            }
        }
    }

    fn bump_store_rev(&self) {
        self.store_rev.send_modify(|rev| *rev += 1);
    }

    async fn publish_trip(&self) {
        self.stores
            .trip
            .set(TripSnapshot {
                mode: self.mode,
                trip: self.trip.clone(),
                last_completed: self.last_completed.clone(),
                lockup: self.lockup,
            })
            .await;
    }
}
