//! Transports for the peripheral link.
//!
//! The link itself is transport-agnostic (anything AsyncRead + AsyncWrite).
//! Real hardware hangs off a blocking serial port, bridged onto an async
//! duplex by two pump threads; a ser2net-style TCP bridge connects directly.

use std::io::{self, Read, Write};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BRIDGE_BUF_BYTES: usize = 4096;
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Open `device` 8N1 at `baud` and return the async side of the bridge.
///
/// Some USB serial adapters need the explicit framing settings.
pub fn open_serial(device: &str, baud: u32) -> io::Result<DuplexStream> {
    let port = serialport::new(device, baud)
        .timeout(SERIAL_READ_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .open()
        .map_err(io::Error::other)?;

    let writer_port = port.try_clone().map_err(io::Error::other)?;
    let (host_side, bridge_side) = tokio::io::duplex(BRIDGE_BUF_BYTES);
    let (bridge_read, bridge_write) = tokio::io::split(bridge_side);

    pump_port_to_async(port, bridge_write);
    pump_async_to_port(bridge_read, writer_port);

    Ok(host_side)
}

/// Blocking thread reading the port, async task writing the duplex.
fn pump_port_to_async(
    mut port: Box<dyn serialport::SerialPort>,
    mut bridge_write: tokio::io::WriteHalf<DuplexStream>,
) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);

    std::thread::spawn(move || {
        let mut buf = [0u8; 512];
        loop {
            match port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(error = %e, "serial read failed, closing bridge");
                    return;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if bridge_write.write_all(&bytes).await.is_err() {
                return;
            }
        }
        debug!("serial reader pump ended");
    });
}

/// Async task reading the duplex, blocking thread writing the port.
fn pump_async_to_port(
    mut bridge_read: tokio::io::ReadHalf<DuplexStream>,
    mut port: Box<dyn serialport::SerialPort>,
) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            match bridge_read.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    std::thread::spawn(move || {
        while let Some(bytes) = rx.blocking_recv() {
            if let Err(e) = port.write_all(&bytes).and_then(|()| port.flush()) {
                warn!(error = %e, "serial write failed, closing bridge");
                return;
            }
        }
    });
}
