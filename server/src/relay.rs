//! Relay model: every message a client sends is recorded and rebroadcast
//! verbatim to all connected clients, including the sender.
//!
//! A single [`RelayLoop`] performs every broadcast and every history replay.
//! Joins travel through the same queue as messages, so a newcomer's replay is
//! queued on its connection before any message relayed after it joined, and
//! its own reader is only started once the replay is queued.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::config::{ConfigError, OverflowPolicy, SyncConfig};
use crate::connection::{Connection, ConnectionId, Frame};
use crate::error::ConnectionError;
use crate::history::HistoryBuffer;
use crate::reader::{spawn_reader, Ingest};
use crate::registry::Registry;

#[derive(Debug)]
pub enum RelayEvent {
    /// Register `conn` and replay history to it; the outcome goes to `replayed`.
    Join {
        conn: Connection,
        replayed: oneshot::Sender<Result<usize, ConnectionError>>,
    },
    /// Record and rebroadcast one message.
    Message { from: ConnectionId, payload: Frame },
}

/// Queues raw client messages for the relay loop.
#[derive(Debug)]
pub struct RelayIngest {
    event_tx: mpsc::Sender<RelayEvent>,
    overflow: OverflowPolicy,
}

impl Ingest for RelayIngest {
    async fn ingest(&self, id: ConnectionId, payload: Vec<u8>) -> Result<(), ConnectionError> {
        let event = RelayEvent::Message {
            from: id,
            payload: payload.into(),
        };

        match self.overflow {
            OverflowPolicy::Block => self
                .event_tx
                .send(event)
                .await
                .map_err(|_| ConnectionError::Closed),
            OverflowPolicy::Drop => self.event_tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => ConnectionError::Capacity,
                TrySendError::Closed(_) => ConnectionError::Closed,
            }),
        }
    }
}

/// Front of the relay model. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RelayServer {
    config: Arc<SyncConfig>,
    registry: Arc<Registry<()>>,
    ingest: Arc<RelayIngest>,
}

impl RelayServer {
    /// Builds the server and the loop that must be driven alongside it.
    pub fn new(config: SyncConfig) -> Result<(Self, RelayLoop), ConfigError> {
        config.validate_relay()?;

        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let (event_tx, event_rx) = mpsc::channel(config.input_channel_capacity);

        let server = Self {
            config: Arc::clone(&config),
            registry: Arc::clone(&registry),
            ingest: Arc::new(RelayIngest {
                event_tx,
                overflow: config.overflow,
            }),
        };
        let relay_loop = RelayLoop {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            history: HistoryBuffer::new(config.history_capacity),
            event_rx,
            relayed: 0,
        };

        Ok((server, relay_loop))
    }

    /// Registers a ready message stream, waits for the relay loop to replay
    /// history to it, then starts its reader task.
    ///
    /// Never completes while the relay loop is not running.
    pub async fn join<S>(&self, stream: S) -> Result<ConnectionId, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.registry.next_id();
        let (conn, reader) = Connection::open(id, stream, self.config.outbound_capacity);

        let (replayed_tx, replayed_rx) = oneshot::channel();
        let join = RelayEvent::Join {
            conn: conn.clone(),
            replayed: replayed_tx,
        };
        if self.ingest.event_tx.send(join).await.is_err() {
            conn.close();
            return Err(ConnectionError::Closed);
        }

        match replayed_rx.await {
            Ok(Ok(count)) => {
                info!("Connection {} joined the relay, replayed {} messages", id, count);
                spawn_reader(
                    conn,
                    reader,
                    Arc::clone(&self.ingest),
                    Arc::clone(&self.registry),
                );
                Ok(id)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                conn.close();
                Err(ConnectionError::Closed)
            }
        }
    }

    pub fn registry(&self) -> &Arc<Registry<()>> {
        &self.registry
    }
}

/// The single consumer of relay events.
#[derive(Debug)]
pub struct RelayLoop {
    registry: Arc<Registry<()>>,
    broadcaster: Broadcaster<()>,
    history: HistoryBuffer,
    event_rx: mpsc::Receiver<RelayEvent>,
    relayed: u64,
}

impl RelayLoop {
    /// Handles one event. Returns the broadcast outcome for messages.
    pub async fn handle(&mut self, event: RelayEvent) -> Option<BroadcastReport> {
        match event {
            RelayEvent::Join { conn, replayed } => {
                let outcome = self.admit(conn).await;
                // The joiner may have given up waiting; nothing to report to.
                let _ = replayed.send(outcome);
                None
            }
            RelayEvent::Message { from, payload } => {
                self.relayed += 1;
                debug!(
                    "Relaying {} bytes from connection {} (message {})",
                    payload.len(),
                    from,
                    self.relayed
                );
                self.history.append(Arc::clone(&payload));
                let report = self.broadcaster.publish(payload).await;
                if !report.evicted.is_empty() {
                    warn!("Relay evicted {} connections", report.evicted.len());
                }
                Some(report)
            }
        }
    }

    async fn admit(&mut self, conn: Connection) -> Result<usize, ConnectionError> {
        let id = conn.id();
        if !self.registry.add(conn.clone(), ()).await {
            warn!("Connection {} is already registered, refusing join", id);
            conn.close();
            return Err(ConnectionError::Duplicate(id));
        }

        match self.history.replay_to(&conn) {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!("Replay to connection {} failed: {}", id, e);
                conn.close();
                self.registry.remove(id).await;
                Err(e)
            }
        }
    }

    /// Processes events until every sender is gone.
    pub async fn run(mut self) {
        info!("Relay loop running");
        while let Some(event) = self.event_rx.recv().await {
            self.handle(event).await;
        }
        info!("Relay loop stopping after {} messages", self.relayed);
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }
}
