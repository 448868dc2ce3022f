use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{Packet, SessionStore, TableEvent, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Connects to a server, walks onto a goal and prints the event stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Goal to walk onto on the first table
    #[arg(long)]
    slot: Option<u8>,

    /// Seconds to listen before disconnecting
    #[arg(long, default_value = "10")]
    seconds: u64,
}

async fn send(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&serialize(packet)?, addr).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);
    let server_addr = args.server.parse::<SocketAddr>()?;

    println!("Sending connection request to {}", server_addr);
    send(
        &socket,
        &Packet::Connect {
            client_version: PROTOCOL_VERSION,
        },
        server_addr,
    )
    .await?;

    let mut store = SessionStore::new();
    let mut buf = vec![0u8; 65536];
    let mut walked = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.seconds);

    while tokio::time::Instant::now() < deadline {
        let received = timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await;
        let Ok(Ok((len, _))) = received else {
            send(&socket, &Packet::Heartbeat, server_addr).await?;
            continue;
        };

        match deserialize::<Packet>(&buf[0..len]) {
            Ok(Packet::Connected { player_id }) => println!("Connected as {}", player_id),
            Ok(Packet::Snapshot {
                base_sequence,
                events,
            }) => {
                println!("Snapshot at #{} with {} events", base_sequence, events.len());
                store = SessionStore::new();
                for event in &events {
                    store.apply(event);
                }
                send(&socket, &Packet::Ack { sequence: base_sequence }, server_addr).await?;

                if let (Some(slot), false) = (args.slot, walked) {
                    if let Some(table_id) = store.tables().first().copied() {
                        println!("Walking to table {} slot {}", table_id, slot);
                        send(&socket, &Packet::WalkTo { table_id, slot: Some(slot) }, server_addr).await?;
                        walked = true;
                    }
                }
            }
            Ok(Packet::Events { envelopes }) => {
                let mut newest = 0;
                for envelope in envelopes {
                    println!("  #{} {:?}", envelope.sequence, envelope.event);
                    if let TableEvent::Log { origin, message } = &envelope.event {
                        println!("  [{}] {}", origin, message);
                    }
                    store.apply(&envelope.event);
                    newest = newest.max(envelope.sequence);
                }
                send(&socket, &Packet::Ack { sequence: newest }, server_addr).await?;
            }
            Ok(Packet::Disconnected { reason }) => {
                println!("Disconnected: {}", reason);
                return Ok(());
            }
            Ok(other) => println!("Unexpected packet: {:?}", other),
            Err(e) => println!("Failed to deserialize packet: {}", e),
        }
    }

    for table_id in store.tables() {
        if let Some(instance) = store.instance(table_id) {
            println!(
                "Table {}: {} with {} player(s)",
                table_id,
                instance.mode,
                instance.occupied_count()
            );
        }
    }

    println!("Sending disconnect request");
    send(&socket, &Packet::Disconnect, server_addr).await?;
    println!("Test client finished");
    Ok(())
}
