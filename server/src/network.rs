//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::{ClientManager, Delivery, RetainedLog, CLIENT_TIMEOUT};
use crate::config::GameConfig;
use crate::game::GameState;
use crate::sim_world::SimWorld;
use crate::world::Pose;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PlayerId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Longest simulated step; a stalled loop catches up in bounded steps
const MAX_TICK_MS: u64 = 250;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        player_id: PlayerId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
}

/// Everything the server needs besides its address
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub tick_duration: Duration,
    pub max_clients: usize,
    pub resend_after: Duration,
    pub tables: usize,
    pub slots: u8,
    pub seed: Option<u64>,
    pub game: GameConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(50),
            max_clients: 16,
            resend_after: Duration::from_millis(200),
            tables: 1,
            slots: 2,
            seed: None,
            game: GameConfig::default(),
        }
    }
}

/// Main server coordinating networking and table simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    world: SimWorld,
    retained: RetainedLog,
    tick_duration: Duration,
    resend_after: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(addr: &str, options: ServerOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let world = SimWorld::demo(options.tables, options.slots, options.game.max_damage);
        info!(
            "Authored {} table(s) with {} slots each",
            options.tables, options.slots
        );

        let game_state = match options.seed {
            Some(seed) => GameState::with_seed(options.game, seed),
            None => GameState::new(options.game),
        };

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(options.max_clients))),
            game_state,
            world,
            retained: RetainedLog::new(),
            tick_duration: options.tick_duration,
            resend_after: options.resend_after,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 65536];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                let GameMessage::SendPacket { packet, addr } = message;
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(CLIENT_TIMEOUT)
                };

                for player_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { player_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_snapshot(&self, addr: SocketAddr) -> u64 {
        let (base_sequence, events) = self.game_state.snapshot();
        debug!(
            "Snapshot at #{} with {} events for {}",
            base_sequence,
            events.len(),
            addr
        );
        self.send_packet(
            Packet::Snapshot {
                base_sequence,
                events,
            },
            addr,
        );
        base_sequence
    }

    async fn drop_player(&mut self, player_id: PlayerId) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&player_id);
        }
        self.world.remove_avatar(player_id);
        self.game_state.log(format!("{} left", player_id));
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let sender = {
            let mut clients = self.clients.write().await;
            clients.touch(addr)
        };

        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: format!(
                                "Protocol version {} required, got {}",
                                PROTOCOL_VERSION, client_version
                            ),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                if let Some(existing_id) = sender {
                    info!("Removing existing {} from {}", existing_id, addr);
                    self.drop_player(existing_id).await;
                }

                let (base, _) = self.game_state.snapshot();
                let player_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, base)
                };

                if let Some(player_id) = player_id {
                    self.world.spawn_avatar(player_id);
                    self.send_packet(Packet::Connected { player_id }, addr);
                    self.send_snapshot(addr);
                    self.game_state.log(format!("{} joined", player_id));
                } else {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    );
                }
            }

            Packet::Ack { sequence } => {
                if let Some(player_id) = sender {
                    let mut clients = self.clients.write().await;
                    clients.acknowledge(player_id, sequence);
                }
            }

            Packet::Publish { event } => {
                if let Some(player_id) = sender {
                    if !self.game_state.publish_remote(player_id, event) {
                        debug!("Discarded event from {}", player_id);
                    }
                }
            }

            Packet::WalkTo { table_id, slot } => {
                if let Some(player_id) = sender {
                    if self.world.walk_avatar_to(player_id, table_id, slot) {
                        match slot {
                            Some(slot) => {
                                info!("{} walked to table {} slot {}", player_id, table_id, slot)
                            }
                            None => info!("{} stepped away from table {}", player_id, table_id),
                        }
                    } else {
                        warn!("{} cannot walk to table {}", player_id, table_id);
                    }
                }
            }

            Packet::PaddlePose {
                paddle_id,
                position,
                rotation,
            } => {
                if let Some(player_id) = sender {
                    let outcome = self.game_state.submit_paddle_pose(
                        &mut self.world,
                        player_id,
                        paddle_id,
                        Pose { position, rotation },
                    );
                    debug!("Pose for paddle {} from {}: {:?}", paddle_id, player_id, outcome);
                }
            }

            Packet::Heartbeat => {}

            Packet::Disconnect => {
                if let Some(player_id) = sender {
                    self.drop_player(player_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Advances every table and the world by one tick
    fn simulate(&mut self, dt_ms: u64) {
        self.game_state.tick(&mut self.world, dt_ms);
        self.world.step(dt_ms as f32 / 1000.0);
        self.retained.extend(self.game_state.take_outbox());
    }

    /// Sends every client its share of the retained log
    async fn deliver_events(&mut self) {
        let deliveries = {
            let mut clients = self.clients.write().await;
            clients.collect_deliveries(&self.retained, self.resend_after)
        };

        for delivery in deliveries {
            match delivery {
                Delivery::Envelopes { addr, envelopes } => {
                    self.send_packet(Packet::Events { envelopes }, addr);
                }
                Delivery::Resync { id, addr } => {
                    info!("{} fell behind, sending a fresh snapshot", id);
                    let base = self.send_snapshot(addr);
                    let mut clients = self.clients.write().await;
                    clients.resync(id, base);
                }
            }
        }

        // Late joiners start at the last applied sequence, so nothing past it
        // may be trimmed even when every client acknowledged it.
        let delivered = self.game_state.bus.delivered_through();
        let floor = {
            let clients = self.clients.read().await;
            clients.lowest_ack().unwrap_or(delivered).min(delivered)
        };
        let trimmed = self.retained.trim(floor);
        if trimmed > 0 {
            debug!("Trimmed {} envelopes up to #{}", trimmed, floor);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { player_id }) => {
                            self.world.remove_avatar(player_id);
                            self.game_state.log(format!("{} timed out", player_id));
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt_ms = (now.duration_since(last_tick).as_millis() as u64).min(MAX_TICK_MS);
                    last_tick = now;

                    self.simulate(dt_ms);
                    self.deliver_events().await;

                    // Periodic performance monitoring
                    if self.game_state.tick % 100 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };

                        if client_count > 0 {
                            debug!(
                                "Tick {}: {} clients, {} tables, {} retained envelopes",
                                self.game_state.tick,
                                client_count,
                                self.game_state.store.tables().len(),
                                self.retained.len()
                            );
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use shared::{EntityId, TableEvent};
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    async fn create_test_server() -> Server {
        let options = ServerOptions {
            max_clients: 2,
            seed: Some(5),
            ..ServerOptions::default()
        };
        Server::new("127.0.0.1:0", options).await.unwrap()
    }

    fn outgoing(server: &mut Server) -> Vec<(Packet, SocketAddr)> {
        let mut packets = Vec::new();
        while let Ok(GameMessage::SendPacket { packet, addr }) = server.game_rx.try_recv() {
            packets.push((packet, addr));
        }
        packets
    }

    async fn connect(server: &mut Server, port: u16) -> PlayerId {
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                test_addr(port),
            )
            .await;
        let clients = server.clients.read().await;
        clients.find_client_by_addr(test_addr(port)).unwrap()
    }

    #[test]
    fn test_server_message_creation() {
        let addr = test_addr(8080);
        let msg = ServerMessage::PacketReceived {
            packet: Packet::Heartbeat,
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert!(matches!(packet, Packet::Heartbeat));
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_client_timeout_message() {
        let msg = ServerMessage::ClientTimeout {
            player_id: PlayerId(42),
        };

        match msg {
            ServerMessage::ClientTimeout { player_id } => assert_eq!(player_id, PlayerId(42)),
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_connect_sends_id_and_snapshot() {
        let mut server = create_test_server().await;
        for _ in 0..2 {
            server.simulate(50);
        }

        let player_id = connect(&mut server, 9000).await;
        assert!(server.world.avatar_of(player_id).is_some());

        let packets = outgoing(&mut server);
        assert_eq!(packets.len(), 2);
        match &packets[0].0 {
            Packet::Connected { player_id: id } => assert_eq!(*id, player_id),
            other => panic!("expected Connected, got {:?}", other),
        }
        match &packets[1].0 {
            Packet::Snapshot {
                base_sequence,
                events,
            } => {
                assert_eq!(*base_sequence, server.game_state.bus.delivered_through());
                assert!(events
                    .iter()
                    .any(|e| matches!(e, TableEvent::StartGame { .. })));
            }
            other => panic!("expected Snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_version_is_refused() {
        let mut server = create_test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: 99 }, test_addr(9000))
            .await;

        let packets = outgoing(&mut server);
        assert!(matches!(packets[0].0, Packet::Disconnected { .. }));
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut server = create_test_server().await;
        connect(&mut server, 9000).await;
        connect(&mut server, 9001).await;
        outgoing(&mut server);

        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                test_addr(9002),
            )
            .await;
        let packets = outgoing(&mut server);
        assert!(matches!(packets[0].0, Packet::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_removes_avatar() {
        let mut server = create_test_server().await;
        let player_id = connect(&mut server, 9000).await;

        server.handle_packet(Packet::Disconnect, test_addr(9000)).await;
        assert!(server.world.avatar_of(player_id).is_none());
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_delivered_and_trimmed_after_ack() {
        let mut server = create_test_server().await;
        let player_id = connect(&mut server, 9000).await;
        outgoing(&mut server);

        server.simulate(50);
        server.simulate(50);
        server.deliver_events().await;

        let packets = outgoing(&mut server);
        let newest = packets
            .iter()
            .filter_map(|(packet, _)| match packet {
                Packet::Events { envelopes } => envelopes.last().map(|e| e.sequence),
                _ => None,
            })
            .max()
            .unwrap();

        server
            .handle_packet(Packet::Ack { sequence: newest }, test_addr(9000))
            .await;
        assert_eq!(
            server.clients.read().await.get(&player_id).unwrap().acked,
            newest
        );

        server.deliver_events().await;
        let floor = newest.min(server.game_state.bus.delivered_through());
        assert!(server
            .retained
            .first_sequence()
            .map_or(true, |first| first > floor));
    }

    #[tokio::test]
    async fn test_walk_to_occupies_slot() {
        let mut server = create_test_server().await;
        let player_id = connect(&mut server, 9000).await;
        let table = server.world.tables()[0];

        server
            .handle_packet(
                Packet::WalkTo {
                    table_id: table,
                    slot: Some(1),
                },
                test_addr(9000),
            )
            .await;
        for _ in 0..4 {
            server.simulate(50);
        }

        let instance = server.game_state.store.instance(table).unwrap();
        assert_eq!(instance.occupant(1), Some(player_id));
    }

    #[tokio::test]
    async fn test_unknown_sender_is_ignored() {
        let mut server = create_test_server().await;
        server
            .handle_packet(
                Packet::Publish {
                    event: TableEvent::EndGame {
                        table_id: EntityId(1),
                    },
                },
                test_addr(9000),
            )
            .await;
        assert_eq!(server.game_state.bus.pending(), 0);
    }
}
