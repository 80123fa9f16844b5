use clap::{Parser, ValueEnum};
use log::{error, info};
use server::config::{OverflowPolicy, SyncConfig};
use server::network;
use server::relay::RelayServer;
use server::tick::TickServer;
use shared::{
    Codec, DEFAULT_BOARD_SIZE, DEFAULT_HISTORY_CAPACITY, DEFAULT_INPUT_CHANNEL_CAPACITY,
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_TICK_RATE,
};
use tokio::net::TcpListener;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Fixed-rate position snapshots
    Tick,
    /// Replayable message relay
    Relay,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on (falls back to $PORT, then 8080)
    #[clap(short, long)]
    port: Option<u16>,
    /// Synchronization model
    #[clap(short, long, value_enum, default_value = "tick")]
    mode: Mode,
    /// Tick rate (snapshots per second)
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,
    /// Clamp bound per axis
    #[clap(short, long, default_value_t = DEFAULT_BOARD_SIZE)]
    board_size: i32,
    /// Capacity of the input ingestion channel
    #[clap(long, default_value_t = DEFAULT_INPUT_CHANNEL_CAPACITY)]
    input_capacity: usize,
    /// Frames a client may have queued before it is dropped
    #[clap(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    outbound_capacity: usize,
    /// Messages kept for replay to late joiners
    #[clap(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    history_capacity: usize,
    /// What to do with input when the ingestion channel is full (block or drop)
    #[clap(long, default_value = "block")]
    overflow: OverflowPolicy,
    /// Payload encoding for the tick model (json or bincode)
    #[clap(long, default_value = "json")]
    codec: Codec,
}

impl Args {
    fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            tick_rate: self.tick_rate,
            board_size: self.board_size,
            input_channel_capacity: self.input_capacity,
            outbound_capacity: self.outbound_capacity,
            history_capacity: self.history_capacity,
            overflow: self.overflow,
            codec: self.codec,
            ..SyncConfig::default()
        }
    }
}

/// Parses command-line arguments, binds the listener, then runs the chosen
/// model's loop next to the accept loop until either stops or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.sync_config();

    let address = format!("{}:{}", args.host, args.port());
    let listener = TcpListener::bind(&address).await?;
    info!("Sync server ({:?} model) running on {}", args.mode, address);

    match args.mode {
        Mode::Tick => {
            let (server, tick_loop) = TickServer::new(config)?;
            let loop_handle = tokio::spawn(tick_loop.run());
            let network_handle = tokio::spawn(network::serve(listener, server));
            wait_for_shutdown(loop_handle, network_handle).await;
        }
        Mode::Relay => {
            let (server, relay_loop) = RelayServer::new(config)?;
            let loop_handle = tokio::spawn(relay_loop.run());
            let network_handle = tokio::spawn(network::serve(listener, server));
            wait_for_shutdown(loop_handle, network_handle).await;
        }
    }

    Ok(())
}

async fn wait_for_shutdown(
    loop_handle: tokio::task::JoinHandle<()>,
    network_handle: tokio::task::JoinHandle<std::io::Result<()>>,
) {
    tokio::select! {
        result = loop_handle => {
            if let Err(e) = result {
                error!("Sync loop task panicked: {}", e);
            }
        }
        result = network_handle => {
            match result {
                Ok(Err(e)) => error!("Network task failed: {}", e),
                Err(e) => error!("Network task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }
}
