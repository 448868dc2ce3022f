use clap::Parser;
use client::network::Client;
use log::info;
use shared::EntityId;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Table to walk to (defaults to the first table in the snapshot)
    #[arg(long)]
    table: Option<u64>,

    /// Goal to stand on; without it the client only observes
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
    slot: Option<u8>,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    match args.slot {
        Some(slot) => info!("Playing on slot {}", slot),
        None => info!("Observing only"),
    }

    let mut client =
        Client::new(&args.server, args.fake_ping, args.table.map(EntityId), args.slot).await?;

    client.run().await?;

    Ok(())
}
