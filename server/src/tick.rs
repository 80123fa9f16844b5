//! Tick model: players send movement deltas, the server broadcasts every
//! player's position at a fixed rate.
//!
//! [`TickServer`] is the cloneable front used to admit connections.
//! [`TickLoop`] owns the receiving end of the input channel and is the only
//! place positions change. Each tick drains every queued input, applies them
//! in arrival order with clamping, then composes and broadcasts one
//! [`Snapshot`]. Because the whole drain lands before the compose, all input
//! received since the previous tick shows up together in the next frame.

use log::{debug, error, info, warn};
use shared::{Codec, CodecError, MoveInput, Position, Snapshot};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::broadcast::Broadcaster;
use crate::config::{ConfigError, OverflowPolicy, SyncConfig};
use crate::connection::{Connection, ConnectionId, Frame};
use crate::error::ConnectionError;
use crate::reader::{spawn_reader, Ingest};
use crate::registry::Registry;

/// One movement delta waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub id: ConnectionId,
    pub input: MoveInput,
}

/// Decodes movement frames and queues them on the input channel.
#[derive(Debug)]
pub struct TickIngest {
    input_tx: mpsc::Sender<InputEvent>,
    codec: Codec,
    overflow: OverflowPolicy,
}

impl Ingest for TickIngest {
    async fn ingest(&self, id: ConnectionId, payload: Vec<u8>) -> Result<(), ConnectionError> {
        let input: MoveInput = self.codec.decode(&payload)?;
        let event = InputEvent { id, input };

        match self.overflow {
            OverflowPolicy::Block => self
                .input_tx
                .send(event)
                .await
                .map_err(|_| ConnectionError::Closed),
            OverflowPolicy::Drop => self.input_tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => ConnectionError::Capacity,
                TrySendError::Closed(_) => ConnectionError::Closed,
            }),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Inputs drained from the channel
    pub received: usize,
    /// Inputs whose connection was still registered
    pub applied: usize,
    /// Players in the broadcast snapshot
    pub players: usize,
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

impl TickReport {
    /// Inputs that arrived for connections removed before the tick.
    pub fn ignored(&self) -> usize {
        self.received - self.applied
    }
}

/// Front of the tick model. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TickServer {
    config: Arc<SyncConfig>,
    registry: Arc<Registry<Position>>,
    ingest: Arc<TickIngest>,
}

impl TickServer {
    /// Builds the server and the loop that must be driven alongside it.
    pub fn new(config: SyncConfig) -> Result<(Self, TickLoop), ConfigError> {
        config.validate()?;

        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let (input_tx, input_rx) = mpsc::channel(config.input_channel_capacity);

        let server = Self {
            config: Arc::clone(&config),
            registry: Arc::clone(&registry),
            ingest: Arc::new(TickIngest {
                input_tx,
                codec: config.codec,
                overflow: config.overflow,
            }),
        };
        let tick_loop = TickLoop {
            config,
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            input_rx,
            tick: 0,
            inputs_closed: false,
        };

        Ok((server, tick_loop))
    }

    /// Registers a ready message stream at the spawn position and starts its
    /// reader task.
    pub async fn join<S>(&self, stream: S) -> Result<ConnectionId, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.registry.next_id();
        let (conn, reader) = Connection::open(id, stream, self.config.outbound_capacity);
        if !self.registry.add(conn.clone(), self.config.spawn).await {
            warn!("Player {} is already registered, refusing join", id);
            conn.close();
            return Err(ConnectionError::Duplicate(id));
        }
        info!(
            "Player {} joined at ({}, {})",
            id, self.config.spawn.x, self.config.spawn.y
        );

        spawn_reader(
            conn,
            reader,
            Arc::clone(&self.ingest),
            Arc::clone(&self.registry),
        );
        Ok(id)
    }

    pub fn registry(&self) -> &Arc<Registry<Position>> {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

/// The synchronization loop of the tick model.
#[derive(Debug)]
pub struct TickLoop {
    config: Arc<SyncConfig>,
    registry: Arc<Registry<Position>>,
    broadcaster: Broadcaster<Position>,
    input_rx: mpsc::Receiver<InputEvent>,
    tick: u64,
    inputs_closed: bool,
}

impl TickLoop {
    /// Runs one tick: drain, apply, compose, broadcast.
    pub async fn tick(&mut self) -> Result<TickReport, CodecError> {
        self.tick += 1;

        let mut inputs = Vec::new();
        loop {
            match self.input_rx.try_recv() {
                Ok(event) => inputs.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.inputs_closed = true;
                    break;
                }
            }
        }

        let received = inputs.len();
        let board_size = self.config.board_size;
        let applied = self
            .registry
            .mutate_batch(
                inputs.into_iter().map(|event| (event.id, event.input)),
                |position, input| position.apply_delta(input, board_size),
            )
            .await;
        if applied < received {
            debug!(
                "Tick {}: ignored {} inputs from departed players",
                self.tick,
                received - applied
            );
        }

        let (positions, targets) = self.registry.snapshot_with_connections().await;
        let snapshot = Snapshot::new(positions);
        let frame: Frame = self.config.codec.encode(&snapshot)?.into();
        let broadcast = self.broadcaster.publish_to(targets, frame).await;

        Ok(TickReport {
            tick: self.tick,
            received,
            applied,
            players: snapshot.len(),
            delivered: broadcast.delivered,
            evicted: broadcast.evicted,
        })
    }

    /// Ticks at the configured rate until every input sender is gone.
    pub async fn run(mut self) {
        let mut interval_timer = interval(self.config.tick_interval());
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        interval_timer.tick().await;
        info!("Tick loop running at {} Hz", self.config.tick_rate);

        loop {
            interval_timer.tick().await;

            match self.tick().await {
                Ok(report) => {
                    if !report.evicted.is_empty() {
                        warn!(
                            "Tick {}: evicted {} connections",
                            report.tick,
                            report.evicted.len()
                        );
                    }
                    if report.tick % 100 == 0 {
                        debug!(
                            "Tick {}: {} players, {} inputs applied",
                            report.tick, report.players, report.applied
                        );
                    }
                }
                Err(e) => error!("Failed to encode snapshot: {}", e),
            }

            if self.inputs_closed {
                info!("Tick loop stopping: no more input sources");
                break;
            }
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }
}
