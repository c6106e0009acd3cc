//! In-process MCU simulator.
//!
//! Speaks the real wire protocol over a duplex stream: applies and
//! acknowledges commands, answers parameter enquiries, and streams a
//! free-running pulse counter as the simulated cab drifts around town.

use std::time::Duration;

use hansom_core::{DeviceIdentity, MeterTariff};
use hansom_link::{FrameDecoder, McuCommand, McuEvent};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PULSE_INTERVAL: Duration = Duration::from_secs(1);
const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Simulated cab speed, in pulses added per tick.
const MAX_PULSES_PER_TICK: u32 = 35;

pub async fn run(stream: DuplexStream, cancel: CancellationToken) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut tariff = MeterTariff::default();
    let identity = DeviceIdentity {
        serial: "HSM-SIM-0001".into(),
        license_plate: "SIM-0001".into(),
    };
    let mut pulse_count: u32 = 0;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    let mut pulse_tick = tokio::time::interval(PULSE_INTERVAL);
    let mut time_tick = tokio::time::interval(TIME_SYNC_INTERVAL);

    info!("mock MCU started");
    send(&mut writer, &McuEvent::AccStatus(true)).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("mock MCU shutting down");
                return;
            }
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    handle_command(&frame, &mut tariff, &identity, &mut writer).await;
                }
            }
            _ = pulse_tick.tick() => {
                pulse_count = pulse_count.wrapping_add(rand::rng().random_range(0..=MAX_PULSES_PER_TICK));
                send(&mut writer, &McuEvent::PulseCount(pulse_count)).await;
            }
            _ = time_tick.tick() => {
                send(&mut writer, &McuEvent::TimeSync(jiff::Timestamp::now())).await;
            }
        }
    }
}

async fn handle_command(
    frame: &hansom_link::RawFrame,
    tariff: &mut MeterTariff,
    identity: &DeviceIdentity,
    writer: &mut WriteHalf<DuplexStream>,
) {
    let Some(cmd) = McuCommand::decode(frame) else {
        debug!(opcode = frame.opcode, "mock MCU ignoring unknown frame");
        return;
    };

    match &cmd {
        McuCommand::SetKValue(k) => tariff.k_value = *k,
        McuCommand::SetPriceParams {
            start_cents,
            step_cents,
            step2_cents,
            threshold_m,
        } => {
            tariff.start_cents = *start_cents;
            tariff.step_cents = *step_cents;
            tariff.step2_cents = *step2_cents;
            tariff.threshold_m = *threshold_m;
        }
        McuCommand::UpdateMcuParams(t) => *tariff = *t,
        McuCommand::PrintReceipt(trip) => {
            info!(total_cents = trip.total_cents(), "mock MCU printing receipt");
        }
        McuCommand::SetLicensePlate(_) | McuCommand::EnquireParameters => {}
    }

    send(
        writer,
        &McuEvent::Ack {
            opcode: frame.opcode,
            status: 0,
        },
    )
    .await;

    if matches!(cmd, McuCommand::EnquireParameters) {
        send(writer, &McuEvent::FareParams(*tariff)).await;
        send(writer, &McuEvent::DeviceId(identity.clone())).await;
    }
}

async fn send(writer: &mut WriteHalf<DuplexStream>, event: &McuEvent) {
    if let Some(bytes) = event.encode() {
        let _ = writer.write_all(&bytes).await;
    }
}
