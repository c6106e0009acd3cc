use std::time::Duration;

use hansom_core::MeterTariff;
use hansom_link::command::opcode;
use hansom_link::{FrameDecoder, LinkError, McuCommand, McuEvent, McuLink};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

/// Scripted peripheral: applies commands to a tariff snapshot, acks
/// everything except a plate of "NOACK", rejects k = 59_999 with status 2,
/// and answers enquiries with FareParams.
async fn run_mock_mcu(stream: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut tariff = MeterTariff::default();
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        while let Some(frame) = decoder.next_frame() {
            let Some(cmd) = McuCommand::decode(&frame) else {
                continue;
            };

            match &cmd {
                McuCommand::SetLicensePlate(plate) if plate == "NOACK" => continue,
                McuCommand::SetKValue(59_999) => {
                    send(&mut writer, &McuEvent::Ack { opcode: frame.opcode, status: 2 }).await;
                    continue;
                }
                _ => {}
            }

            match cmd {
                McuCommand::SetKValue(k) => tariff.k_value = k,
                McuCommand::UpdateMcuParams(t) => tariff = t,
                McuCommand::SetPriceParams {
                    start_cents,
                    step_cents,
                    step2_cents,
                    threshold_m,
                } => {
                    tariff.start_cents = start_cents;
                    tariff.step_cents = step_cents;
                    tariff.step2_cents = step2_cents;
                    tariff.threshold_m = threshold_m;
                }
                _ => {}
            }

            send(&mut writer, &McuEvent::Ack { opcode: frame.opcode, status: 0 }).await;

            if frame.opcode == opcode::ENQUIRE_PARAMETERS {
                send(&mut writer, &McuEvent::FareParams(tariff)).await;
            }
        }
    }
}

async fn send<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, ev: &McuEvent) {
    let bytes = ev.encode().expect("encodable event");
    w.write_all(&bytes).await.expect("mock write");
}

fn spawn_link() -> (hansom_link::McuHandle, tokio::sync::mpsc::Receiver<McuEvent>, CancellationToken) {
    let (host_side, mcu_side) = tokio::io::duplex(1024);
    tokio::spawn(run_mock_mcu(mcu_side));
    let cancel = CancellationToken::new();
    let (handle, events) = McuLink::start(host_side, cancel.clone());
    (handle, events, cancel)
}

#[tokio::test]
async fn command_is_acknowledged() {
    let (handle, _events, _cancel) = spawn_link();
    handle.command(&McuCommand::SetKValue(4200)).await.unwrap();
}

#[tokio::test]
async fn rejected_status_surfaces() {
    let (handle, _events, _cancel) = spawn_link();
    let err = handle.command(&McuCommand::SetKValue(59_999)).await.unwrap_err();
    assert!(matches!(err, LinkError::Rejected(2)));
}

#[tokio::test]
async fn validation_fails_before_the_wire() {
    let (handle, _events, _cancel) = spawn_link();
    let err = handle.command(&McuCommand::SetKValue(1)).await.unwrap_err();
    assert!(matches!(err, LinkError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn lost_ack_times_out() {
    let (handle, _events, _cancel) = spawn_link();
    let handle = handle.with_timeout(Duration::from_millis(100));
    let err = handle
        .command(&McuCommand::SetLicensePlate("NOACK".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Timeout));

    // The link survives an unacknowledged command.
    handle.command(&McuCommand::SetKValue(1500)).await.unwrap();
}

#[tokio::test]
async fn enquiry_reflects_previously_set_parameters() {
    let (handle, mut events, _cancel) = spawn_link();

    handle.command(&McuCommand::SetKValue(4242)).await.unwrap();
    handle.command(&McuCommand::EnquireParameters).await.unwrap();

    let ev = events.recv().await.expect("fare params event");
    let McuEvent::FareParams(tariff) = ev else {
        panic!("expected FareParams, got {ev:?}");
    };
    assert_eq!(tariff.k_value, 4242);
}

#[tokio::test]
async fn cancellation_closes_the_link() {
    let (handle, _events, cancel) = spawn_link();
    cancel.cancel();
    let err = handle.command(&McuCommand::SetKValue(1500)).await.unwrap_err();
    assert!(matches!(err, LinkError::Closed));
}

#[tokio::test]
async fn queued_commands_run_in_order() {
    let (handle, _events, _cancel) = spawn_link();

    let mut joins = Vec::new();
    for k in [1000, 2000, 3000, 4000] {
        let handle = handle.clone();
        joins.push(tokio::spawn(async move {
            handle.command(&McuCommand::SetKValue(k)).await
        }));
    }
    for join in joins {
        join.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn events_survive_line_noise() {
    let (host_side, mcu_side) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    let (_handle, mut events) = McuLink::start(host_side, cancel.clone());

    let (_r, mut w) = tokio::io::split(mcu_side);
    w.write_all(&[0x00, 0xFF, 0xAA, 0x13]).await.unwrap();
    send(&mut w, &McuEvent::PulseCount(77)).await;
    w.write_all(&[0xAA, 0x55, 0x84, 0x04, 9, 9, 9, 9, 0x00]).await.unwrap(); // bad checksum
    send(&mut w, &McuEvent::AccStatus(true)).await;

    assert_eq!(events.recv().await, Some(McuEvent::PulseCount(77)));
    assert_eq!(events.recv().await, Some(McuEvent::AccStatus(true)));
}
