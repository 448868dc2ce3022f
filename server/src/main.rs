use clap::Parser;
use log::info;
use server::config::GameConfig;
use server::network::{Server, ServerOptions};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(long, default_value = "16")]
    max_clients: usize,

    /// Number of tables authored into the world
    #[arg(long, default_value = "1")]
    tables: usize,

    /// Goals per table
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=4))]
    slots: u8,

    /// Damage a goal takes before the round ends
    #[arg(long, default_value = "9")]
    max_damage: u32,

    /// How long an empty plate keeps its player, in milliseconds
    #[arg(long, default_value = "5000")]
    occupancy_grace_ms: u64,

    /// Resend unacknowledged events after this many milliseconds
    #[arg(long, default_value = "200")]
    resend_ms: u64,

    /// Seed for ball launches
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_rate = args.tick_rate.max(1);

    let options = ServerOptions {
        tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
        max_clients: args.max_clients,
        resend_after: Duration::from_millis(args.resend_ms),
        tables: args.tables,
        slots: args.slots,
        seed: args.seed,
        game: GameConfig {
            max_damage: args.max_damage.max(1),
            occupancy_grace_ms: args.occupancy_grace_ms,
            ..GameConfig::default()
        },
    };

    info!("Starting server at {} Hz", tick_rate);
    if let Some(seed) = args.seed {
        info!("Ball launches seeded with {}", seed);
    }

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, options).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
