//! Peripheral link client.
//!
//! [`McuLink::start`] owns a serial/TCP/in-process transport for the life of
//! one session. A reader task decodes frames, resolves command
//! acknowledgements and forwards everything else as [`McuEvent`]s. Commands
//! go through [`McuHandle::command`], which keeps a single command in flight
//! on the wire; concurrent callers queue on the writer lock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::command::{McuCommand, ValidationError};
use crate::event::McuEvent;
use crate::frame::FrameDecoder;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_QUEUE_DEPTH: usize = 64;
const READ_BUF_BYTES: usize = 256;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("timed out waiting for acknowledgement")]
    Timeout,
    #[error("peripheral rejected command, status {0}")]
    Rejected(u8),
    #[error("link closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct McuLink;

impl McuLink {
    /// Split the transport and start the reader task.
    ///
    /// Returns the command handle and the event stream. The session ends
    /// when `cancel` fires, the transport reaches EOF, or reading fails;
    /// the reader cancels the token on its way out, so in-flight and
    /// subsequent commands resolve as [`LinkError::Closed`] rather than
    /// hanging. A cancelled await means "no conclusive response" — the
    /// caller must not assume the command was applied.
    pub fn start<T>(
        transport: T,
        cancel: CancellationToken,
    ) -> (McuHandle, mpsc::Receiver<McuEvent>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let pending: Arc<DashMap<u8, oneshot::Sender<u8>>> = Arc::new(DashMap::new());

        tokio::spawn(read_loop(
            read_half,
            event_tx,
            Arc::clone(&pending),
            cancel.clone(),
        ));

        let handle = McuHandle {
            writer: Arc::new(Mutex::new(Box::new(write_half) as Writer)),
            pending,
            cancel,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        };
        (handle, event_rx)
    }
}

#[derive(Clone)]
pub struct McuHandle {
    writer: Arc<Mutex<Writer>>,
    pending: Arc<DashMap<u8, oneshot::Sender<u8>>>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl McuHandle {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send one command and await its acknowledgement.
    ///
    /// The writer lock is held until the ack (or timeout) so exactly one
    /// command is in flight on the wire; later callers queue in order.
    pub async fn command(&self, cmd: &McuCommand) -> Result<(), LinkError> {
        let bytes = cmd.encode()?;
        let op = cmd.opcode();

        let mut writer = self.writer.lock().await;
        if self.cancel.is_cancelled() {
            return Err(LinkError::Closed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending.insert(op, ack_tx);

        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await?;

            tokio::select! {
                ack = ack_rx => match ack {
                    Ok(0) => Ok(()),
                    Ok(status) => Err(LinkError::Rejected(status)),
                    Err(_) => Err(LinkError::Closed),
                },
                _ = tokio::time::sleep(self.timeout) => Err(LinkError::Timeout),
                _ = self.cancel.cancelled() => Err(LinkError::Closed),
            }
        }
        .await;

        if result.is_err() {
            self.pending.remove(&op);
        }
        result
    }
}

async fn read_loop<R>(
    mut reader: R,
    events: mpsc::Sender<McuEvent>,
    pending: Arc<DashMap<u8, oneshot::Sender<u8>>>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUF_BYTES];

    'session: loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("transport eof");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "link read failed");
                    break;
                }
            },
        };

        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.next_frame() {
            match McuEvent::decode_frame(&frame) {
                McuEvent::Malformed => {
                    debug!(opcode = frame.opcode, dropped = decoder.dropped(), "malformed frame dropped");
                }
                McuEvent::Ack { opcode, status } => {
                    match pending.remove(&opcode) {
                        Some((_, ack_tx)) => {
                            let _ = ack_tx.send(status);
                        }
                        None => trace!(opcode, "unsolicited ack"),
                    }
                }
                event => {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'session,
                        sent = events.send(event) => {
                            if sent.is_err() {
                                debug!("event receiver gone, stopping reader");
                                break 'session;
                            }
                        }
                    }
                }
            }
        }
    }

    // Session over: wake every in-flight command await and mark the
    // handle closed.
    pending.clear();
    cancel.cancel();
}
