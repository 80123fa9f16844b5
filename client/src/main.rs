use clap::{Parser, ValueEnum};
use client::input::RandomWalk;
use client::network::Bot;
use log::info;
use shared::Codec;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Tick,
    Relay,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Synchronization model the server runs
    #[arg(short = 'm', long, value_enum, default_value = "tick")]
    mode: Mode,

    /// Payload encoding for the tick model (json or bincode)
    #[arg(long, default_value = "json")]
    codec: Codec,

    /// Messages to send before exiting
    #[arg(short = 'n', long, default_value = "100")]
    count: u64,

    /// Milliseconds between messages
    #[arg(short = 'i', long, default_value = "50")]
    interval_ms: u64,

    /// Largest step per axis in tick mode
    #[arg(long, default_value = "3")]
    max_step: i32,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let bot = Bot::connect(&args.server, args.codec, args.fake_ping).await?;
    let every = Duration::from_millis(args.interval_ms.max(1));

    let stats = match args.mode {
        Mode::Tick => {
            bot.run_tick(RandomWalk::new(args.max_step), every, args.count)
                .await?
        }
        Mode::Relay => bot.run_relay("bot", every, args.count).await?,
    };

    if let Some(snapshot) = stats.last_snapshot {
        info!("Last snapshot: {:?}", snapshot.positions);
    }
    Ok(())
}
