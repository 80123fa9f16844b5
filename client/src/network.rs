//! Client side of the sync protocol.

use log::{debug, info, warn};
use shared::framing::{read_frame, write_frame};
use shared::{Codec, MoveInput, Snapshot};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::input::RandomWalk;

pub type BotError = Box<dyn std::error::Error + Send + Sync>;

/// What a bot saw during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotStats {
    pub sent: u64,
    pub received: u64,
    pub last_snapshot: Option<Snapshot>,
}

/// A headless client over any message stream.
pub struct Bot<S> {
    stream: S,
    codec: Codec,
    fake_ping_ms: u64,
}

impl Bot<TcpStream> {
    pub async fn connect(addr: &str, codec: Codec, fake_ping_ms: u64) -> Result<Self, BotError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(Self::new(stream, codec, fake_ping_ms))
    }
}

impl<S> Bot<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: Codec, fake_ping_ms: u64) -> Self {
        Self {
            stream,
            codec,
            fake_ping_ms,
        }
    }

    pub async fn send_move(&mut self, input: MoveInput) -> Result<(), BotError> {
        let payload = self.codec.encode(&input)?;
        self.send_raw(&payload).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, payload: &[u8]) -> io::Result<()> {
        delayed_write(&mut self.stream, payload, self.fake_ping_ms).await
    }

    /// Next snapshot, or `None` once the server closes the stream.
    pub async fn recv_snapshot(&mut self) -> Result<Option<Snapshot>, BotError> {
        match read_frame(&mut self.stream).await? {
            Some(frame) => Ok(Some(self.codec.decode(&frame)?)),
            None => Ok(None),
        }
    }

    pub async fn recv_raw(&mut self) -> io::Result<Option<Vec<u8>>> {
        read_frame(&mut self.stream).await
    }

    /// Sends `moves` random deltas, one every `every`, while counting the
    /// snapshots that arrive. Stops after the last move or when the server
    /// closes the stream.
    pub async fn run_tick(
        self,
        mut walk: RandomWalk,
        every: Duration,
        moves: u64,
    ) -> Result<BotStats, BotError> {
        let codec = self.codec;
        let fake_ping_ms = self.fake_ping_ms;
        let (mut reader, mut writer) = tokio::io::split(self.stream);
        let mut stats = BotStats::default();
        let mut sent = 0;
        let mut received = 0;
        let mut last_snapshot = None;

        // Each side runs as one whole loop so no frame read is ever cut short.
        let sending = async {
            let mut send_timer = interval(every);
            send_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            while sent < moves {
                send_timer.tick().await;
                let input = walk.next_input();
                let payload = codec.encode(&input)?;
                delayed_write(&mut writer, &payload, fake_ping_ms).await?;
                sent += 1;
                debug!("Sent move ({}, {})", input.dx, input.dy);
            }
            Ok::<(), BotError>(())
        };
        let receiving = async {
            while let Some(frame) = read_frame(&mut reader).await? {
                let snapshot: Snapshot = codec.decode(&frame)?;
                received += 1;
                debug!("Snapshot with {} players", snapshot.len());
                last_snapshot = Some(snapshot);
            }
            warn!("Server closed the connection");
            Ok::<(), BotError>(())
        };

        // Whichever side stops first ends the run; counts survive either way.
        tokio::select! {
            done = sending => done?,
            closed = receiving => closed?,
        }
        stats.sent = sent;
        stats.received = received;
        stats.last_snapshot = last_snapshot;

        info!(
            "Tick bot finished: {} moves sent, {} snapshots received",
            stats.sent, stats.received
        );
        Ok(stats)
    }

    /// Sends `count` numbered text messages, one every `every`, while counting
    /// everything relayed back.
    pub async fn run_relay(
        self,
        name: &str,
        every: Duration,
        count: u64,
    ) -> Result<BotStats, BotError> {
        let fake_ping_ms = self.fake_ping_ms;
        let (mut reader, mut writer) = tokio::io::split(self.stream);
        let mut stats = BotStats::default();
        let mut sent = 0;
        let mut received = 0;

        let sending = async {
            let mut send_timer = interval(every);
            while sent < count {
                send_timer.tick().await;
                let message = format!("{} #{}", name, sent + 1);
                delayed_write(&mut writer, message.as_bytes(), fake_ping_ms).await?;
                sent += 1;
            }
            Ok::<(), BotError>(())
        };
        let receiving = async {
            while let Some(frame) = read_frame(&mut reader).await? {
                received += 1;
                debug!("Relayed: {}", String::from_utf8_lossy(&frame));
            }
            warn!("Server closed the connection");
            Ok::<(), BotError>(())
        };

        // Whichever side stops first ends the run; counts survive either way.
        tokio::select! {
            done = sending => done?,
            closed = receiving => closed?,
        }
        stats.sent = sent;
        stats.received = received;

        info!(
            "Relay bot finished: {} messages sent, {} received",
            stats.sent, stats.received
        );
        Ok(stats)
    }
}

async fn delayed_write<W>(writer: &mut W, payload: &[u8], fake_ping_ms: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if fake_ping_ms > 0 {
        sleep(Duration::from_millis(fake_ping_ms / 2)).await;
    }
    write_frame(writer, payload).await
}
