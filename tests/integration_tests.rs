//! Integration tests for the sync server and its clients
//!
//! These tests run real servers on loopback TCP (or in-memory streams) and
//! drive them with the headless client bot.

use client::input::RandomWalk;
use client::network::Bot;
use server::config::SyncConfig;
use server::network::serve;
use server::relay::RelayServer;
use server::tick::TickServer;
use shared::framing::{read_frame, write_frame};
use shared::{Codec, MoveInput, Position, Snapshot, SPAWN_POSITION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

/// TICK MODEL TESTS
mod tick_tests {
    use super::*;

    /// Every snapshot lists every connected player
    #[tokio::test]
    async fn snapshot_covers_all_players() {
        let addr = start_tick_server(fast_config()).await;

        let mut bots = Vec::new();
        for _ in 0..3 {
            bots.push(Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap());
        }

        for bot in bots.iter_mut() {
            let snapshot = wait_for_players(bot, 3).await;
            assert!(snapshot.positions.iter().all(|p| *p == SPAWN_POSITION));
        }
    }

    /// Movement is clamped to the board at both edges
    #[tokio::test]
    async fn movement_clamps_to_board() {
        let config = SyncConfig {
            board_size: 10,
            ..fast_config()
        };
        let addr = start_tick_server(config).await;
        let mut bot = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();

        bot.send_move(MoveInput { dx: 100, dy: -100 }).await.unwrap();
        let snapshot = wait_for_position(&mut bot, Position::new(9, 0)).await;
        assert_eq!(snapshot.positions, vec![Position::new(9, 0)]);

        bot.send_move(MoveInput { dx: -3, dy: 4 }).await.unwrap();
        wait_for_position(&mut bot, Position::new(6, 4)).await;
    }

    /// Bincode works end to end as well as JSON
    #[tokio::test]
    async fn bincode_codec_end_to_end() {
        let config = SyncConfig {
            codec: Codec::Bincode,
            ..fast_config()
        };
        let addr = start_tick_server(config).await;
        let mut bot = Bot::connect(&addr.to_string(), Codec::Bincode, 0).await.unwrap();

        bot.send_move(MoveInput { dx: 2, dy: 3 }).await.unwrap();
        wait_for_position(&mut bot, Position::new(3, 4)).await;
    }

    /// A player that disconnects disappears from later snapshots
    #[tokio::test]
    async fn departed_player_leaves_snapshot() {
        let addr = start_tick_server(fast_config()).await;
        let mut stays = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();
        let leaves = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();

        wait_for_players(&mut stays, 2).await;
        drop(leaves);
        wait_for_players(&mut stays, 1).await;
    }

    /// A malformed frame ends that player's session and nobody else's
    #[tokio::test]
    async fn malformed_input_isolated() {
        let addr = start_tick_server(fast_config()).await;
        let mut good = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();
        let mut bad = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();
        wait_for_players(&mut good, 2).await;

        bad.send_raw(b"not json").await.unwrap();
        wait_for_players(&mut good, 1).await;

        good.send_move(MoveInput { dx: 1, dy: 0 }).await.unwrap();
        wait_for_position(&mut good, Position::new(2, 1)).await;
    }

    /// A bot run sends its moves and sees snapshots in between
    #[tokio::test]
    async fn bot_run_counts_traffic() {
        let addr = start_tick_server(fast_config()).await;
        let bot = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();

        let stats = timeout(
            Duration::from_secs(5),
            bot.run_tick(RandomWalk::with_seed(2, 9), Duration::from_millis(20), 10),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(stats.sent, 10);
        assert!(stats.received > 0);
        let last = stats.last_snapshot.unwrap();
        assert_eq!(last.len(), 1);
        assert!(last.positions[0].is_within(SyncConfig::default().board_size));
    }
}

/// RELAY MODEL TESTS
mod relay_tests {
    use super::*;

    /// Messages come back to the sender and reach every other client
    #[tokio::test]
    async fn message_reaches_everyone() {
        let addr = start_relay_server().await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        // Let both joins land before anything is relayed.
        sleep(Duration::from_millis(50)).await;

        write_frame(&mut a, b"hello").await.unwrap();

        assert_eq!(next_frame(&mut a).await, b"hello");
        assert_eq!(next_frame(&mut b).await, b"hello");
    }

    /// A late joiner receives the full history, in order, before live traffic
    #[tokio::test]
    async fn late_joiner_replays_history() {
        let addr = start_relay_server().await;
        let mut early = TcpStream::connect(addr).await.unwrap();
        for text in ["one", "two", "three"] {
            write_frame(&mut early, text.as_bytes()).await.unwrap();
        }
        for text in ["one", "two", "three"] {
            assert_eq!(next_frame(&mut early).await, text.as_bytes());
        }

        let mut late = TcpStream::connect(addr).await.unwrap();
        assert_eq!(next_frame(&mut late).await, b"one");
        assert_eq!(next_frame(&mut late).await, b"two");
        assert_eq!(next_frame(&mut late).await, b"three");

        write_frame(&mut early, b"four").await.unwrap();
        assert_eq!(next_frame(&mut late).await, b"four");
    }

    /// Payloads are relayed byte for byte, whatever they contain
    #[tokio::test]
    async fn payloads_are_opaque() {
        let addr = start_relay_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let payload = vec![0u8, 255, 10, 13, 0];
        write_frame(&mut stream, &payload).await.unwrap();
        assert_eq!(next_frame(&mut stream).await, payload);
    }

    /// A disconnected client does not disturb the rest
    #[tokio::test]
    async fn disconnect_is_isolated() {
        let addr = start_relay_server().await;
        let mut stays = TcpStream::connect(addr).await.unwrap();
        let leaves = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        drop(leaves);

        write_frame(&mut stays, b"still here").await.unwrap();
        assert_eq!(next_frame(&mut stays).await, b"still here");
    }

    /// Relay bots see their own messages plus everyone else's
    #[tokio::test]
    async fn relay_bots_exchange_messages() {
        let addr = start_relay_server().await;
        let mut watcher = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let bot = Bot::connect(&addr.to_string(), Codec::Json, 0).await.unwrap();
        let stats = timeout(
            Duration::from_secs(5),
            bot.run_relay("bot", Duration::from_millis(10), 3),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(stats.sent, 3);

        for n in 1..=3 {
            assert_eq!(next_frame(&mut watcher).await, format!("bot #{}", n).as_bytes());
        }
    }
}

/// IN-MEMORY STREAM TESTS
mod stream_tests {
    use super::*;

    /// The tick server accepts any byte stream, not only TCP
    #[tokio::test]
    async fn tick_server_over_duplex() {
        let (server, tick_loop) = TickServer::new(fast_config()).unwrap();
        tokio::spawn(tick_loop.run());

        let (server_side, client_side) = tokio::io::duplex(4096);
        let id = server.join(server_side).await.unwrap();
        assert_eq!(server.registry().get(id).await, Some(SPAWN_POSITION));

        let mut bot = Bot::new(client_side, Codec::Json, 0);
        bot.send_move(MoveInput { dx: 5, dy: 5 }).await.unwrap();
        wait_for_position(&mut bot, Position::new(6, 6)).await;
        assert_eq!(server.registry().get(id).await, Some(Position::new(6, 6)));
    }

    /// Removing a connection twice is harmless
    #[tokio::test]
    async fn removal_is_idempotent() {
        let (server, relay_loop) = RelayServer::new(SyncConfig::default()).unwrap();
        tokio::spawn(relay_loop.run());

        let (server_side, client_side) = tokio::io::duplex(1024);
        let id = server.join(server_side).await.unwrap();
        assert!(server.registry().remove(id).await.is_some());
        assert!(server.registry().remove(id).await.is_none());

        drop(client_side);
        sleep(Duration::from_millis(20)).await;
        assert!(server.registry().is_empty().await);
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        tick_rate: 100,
        ..SyncConfig::default()
    }
}

async fn start_tick_server(config: SyncConfig) -> SocketAddr {
    let (server, tick_loop) = TickServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, server));
    tokio::spawn(tick_loop.run());
    addr
}

async fn start_relay_server() -> SocketAddr {
    let (server, relay_loop) = RelayServer::new(SyncConfig::default()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, server));
    tokio::spawn(relay_loop.run());
    addr
}

async fn next_snapshot<S>(bot: &mut Bot<S>) -> Snapshot
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    timeout(Duration::from_secs(2), bot.recv_snapshot())
        .await
        .expect("Timed out waiting for a snapshot")
        .unwrap()
        .expect("Server closed the connection")
}

async fn wait_for_players<S>(bot: &mut Bot<S>, players: usize) -> Snapshot
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    for _ in 0..200 {
        let snapshot = next_snapshot(bot).await;
        if snapshot.len() == players {
            return snapshot;
        }
    }
    panic!("Never saw {} players", players);
}

async fn wait_for_position<S>(bot: &mut Bot<S>, expected: Position) -> Snapshot
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    for _ in 0..200 {
        let snapshot = next_snapshot(bot).await;
        if snapshot.positions.contains(&expected) {
            return snapshot;
        }
    }
    panic!("Never saw position {:?}", expected);
}

async fn next_frame(stream: &mut TcpStream) -> Vec<u8> {
    timeout(Duration::from_secs(2), read_frame(stream))
        .await
        .expect("Timed out waiting for a frame")
        .unwrap()
        .expect("Server closed the connection")
}
