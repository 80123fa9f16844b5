//! # Sync Server Library
//!
//! This library is the authoritative core of a many-to-many state
//! synchronization server. Clients connect over a bidirectional message
//! stream, send small input events, and receive a shared view of the world
//! that the server fans out to every connection.
//!
//! ## Synchronization Models
//!
//! ### Tick Model (`tick`)
//! Clients send movement deltas. A fixed-rate loop drains every queued delta,
//! applies it to the sender's position (clamped to the board), then broadcasts
//! the positions of all players. A snapshot goes out every tick whether or not
//! anything moved.
//!
//! ### Relay Model (`relay`)
//! Clients send opaque messages. Each message is appended to a bounded
//! history and rebroadcast verbatim to every connection, sender included.
//! Late joiners receive the recorded history before any live traffic.
//!
//! ## Architecture
//!
//! ### Registry
//! The `Registry` is the only shared mutable resource: a map from connection
//! identity to per-client state behind one lock. Every operation is atomic
//! with respect to the others, and no socket write ever happens while the
//! lock is held.
//!
//! ### Tasks
//! - **Reader** (one per connection): reads frames and hands them to the
//!   model's ingestion path. Removes its connection when it exits.
//! - **Writer** (one per connection): the only task that writes to the
//!   socket, draining a bounded outbound queue.
//! - **Loop** (one per server): the tick loop or the relay loop. All
//!   broadcasts originate here.
//!
//! ### Failure Handling
//! Every per-connection failure (bad frame, read error, full or closed
//! outbound queue) is recovered by evicting that connection. One bad peer
//! never blocks or fails delivery to the others.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::SyncConfig;
//! use server::network::serve;
//! use server::tick::TickServer;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (server, tick_loop) = TickServer::new(SyncConfig::default())?;
//!     tokio::spawn(tick_loop.run());
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     serve(listener, server).await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod network;
pub mod reader;
pub mod registry;
pub mod relay;
pub mod tick;
