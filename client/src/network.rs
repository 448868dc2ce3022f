use crate::game::ClientGameState;
use crate::input::PaddleDriver;
use crate::rendering::Scoreboard;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PlayerId, TableId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

const TICK: Duration = Duration::from_millis(50);
const HEARTBEAT: Duration = Duration::from_secs(1);

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    player_id: Option<PlayerId>,
    connected: bool,

    game_state: ClientGameState,
    driver: PaddleDriver,
    scoreboard: Scoreboard,

    table: Option<TableId>,
    slot: Option<u8>,
    walked: bool,
    last_acked: u64,

    fake_ping_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        table: Option<TableId>,
        slot: Option<u8>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            player_id: None,
            connected: false,
            game_state: ClientGameState::new(),
            driver: PaddleDriver::default(),
            scoreboard: Scoreboard::new(),
            table,
            slot,
            walked: false,
            last_acked: 0,
            fake_ping_ms,
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn acknowledge(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let sequence = self.game_state.applied_through();
        self.send_packet(&Packet::Ack { sequence }).await?;
        self.last_acked = sequence;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected { player_id } => {
                info!("Connected as {}", player_id);
                self.player_id = Some(player_id);
                self.game_state.set_origin(player_id);
                self.connected = true;
            }

            Packet::Snapshot {
                base_sequence,
                events,
            } => {
                self.game_state.apply_snapshot(base_sequence, events);
                self.acknowledge().await?;
                self.walk_to_slot().await?;
            }

            Packet::Events { envelopes } => {
                let released = self.game_state.accept_envelopes(envelopes);
                debug!(
                    "Released {} envelopes, {} held",
                    released,
                    self.game_state.held()
                );
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.player_id = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        Ok(())
    }

    /// Walks onto the requested goal once the tables are known
    async fn walk_to_slot(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(slot) = self.slot else {
            return Ok(());
        };
        if self.walked {
            return Ok(());
        }
        let table_id = match self.table {
            Some(table) => table,
            None => match self.game_state.store.tables().first() {
                Some(table) => *table,
                None => {
                    warn!("No table to walk to yet");
                    return Ok(());
                }
            },
        };

        info!("Walking to table {} slot {}", table_id, slot);
        self.send_packet(&Packet::WalkTo {
            table_id,
            slot: Some(slot),
        })
        .await?;
        self.walked = true;

        if let Some(event) = self
            .game_state
            .log_line(format!("heading for table {} slot {}", table_id, slot))
        {
            self.send_packet(&Packet::Publish { event }).await?;
        }
        Ok(())
    }

    async fn tick(&mut self, dt: f32) -> Result<(), Box<dyn std::error::Error>> {
        if !self.game_state.is_synced() {
            return Ok(());
        }

        self.game_state.apply_pending();
        if self.game_state.applied_through() != self.last_acked {
            self.acknowledge().await?;
        }

        let Some(me) = self.player_id else {
            return Ok(());
        };

        for event in self.game_state.authority_requests(me) {
            debug!("Requesting {:?}", event);
            self.send_packet(&Packet::Publish { event }).await?;
        }

        for command in self.driver.update(&self.game_state.store, me, dt) {
            self.send_packet(&Packet::PaddlePose {
                paddle_id: command.paddle_id,
                position: command.position,
                rotation: command.rotation,
            })
            .await?;
        }

        self.scoreboard.update(&self.game_state.store, Some(me));
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(TICK);
        let mut heartbeat_interval = interval(HEARTBEAT);
        let mut last_tick = Instant::now();

        let mut buffer = vec![0u8; 65536];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    if let Err(e) = self.handle_packet(packet).await {
                                        error!("Error handling packet: {}", e);
                                    }
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    if let Err(e) = self.tick(dt).await {
                        error!("Error during tick: {}", e);
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        self.send_packet(&Packet::Heartbeat).await?;
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving");
                    break;
                }
            }
        }

        if self.connected {
            info!(
                "Sent {} paddle poses, withheld {}",
                self.driver.sent(),
                self.driver.withheld()
            );
            self.send_packet(&Packet::Disconnect).await?;
        }

        Ok(())
    }
}
