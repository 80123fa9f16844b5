//! Connection handles and the per-connection writer task.
//!
//! Every socket write for a connection goes through one writer task that owns
//! the write half of the stream. Other components only ever push frames onto
//! the connection's bounded outbound queue, so replayed history and live
//! broadcasts can never interleave out of order on the wire.

use log::{debug, warn};
use shared::framing::write_frame;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::{ConnectionError, WriteFailure};

/// An encoded payload, shared between every recipient of a broadcast.
pub type Frame = Arc<[u8]>;

/// Identity of a connection. Never exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            // Registered on creation, so a close between the check and the
            // await is not lost.
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Cloneable handle to one client's bidirectional message stream.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Frame>,
    signal: Arc<CloseSignal>,
}

impl Connection {
    /// Splits `stream`, spawns its writer task and returns the handle together
    /// with the read half for the reader task.
    pub fn open<S>(id: ConnectionId, stream: S, outbound_capacity: usize) -> (Self, ReadHalf<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (conn, outbound_rx) = Self::pair(id, outbound_capacity);

        tokio::spawn(run_writer(
            id,
            write_half,
            outbound_rx,
            Arc::clone(&conn.signal),
        ));

        (conn, read_half)
    }

    /// A connection with no socket behind it. Frames sent to it land on the
    /// returned receiver; dropping the receiver makes further sends fail.
    pub fn pair(id: ConnectionId, outbound_capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let conn = Self {
            id,
            outbound,
            signal: Arc::new(CloseSignal::default()),
        };
        (conn, outbound_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame for the writer without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.signal.is_closed() {
            return Err(self.write_error(WriteFailure::Closed));
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => self.write_error(WriteFailure::Full),
            TrySendError::Closed(_) => self.write_error(WriteFailure::Closed),
        })
    }

    /// Stops both the reader and the writer of this connection. Idempotent.
    pub fn close(&self) {
        self.signal.close();
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    /// Resolves once [`Connection::close`] has been called on any clone.
    pub async fn closed(&self) {
        self.signal.wait().await
    }

    fn write_error(&self, reason: WriteFailure) -> ConnectionError {
        ConnectionError::Write {
            id: self.id,
            reason,
        }
    }
}

async fn run_writer<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Frame>,
    signal: Arc<CloseSignal>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = signal.wait() => break,
            frame = outbound_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = signal.wait() => break,
            result = write_frame(&mut writer, &frame) => result,
        };

        if let Err(e) = result {
            warn!("Write to connection {} failed: {}", id, e);
            signal.close();
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of connection {} failed: {}", id, e);
    }
    debug!("Writer for connection {} finished", id);
}
