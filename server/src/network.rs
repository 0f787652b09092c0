//! Server network layer: UDP transport, call routing and the host tick loop

use crate::buffered::BufferedRpcs;
use crate::client_manager::ClientManager;
use crate::error::ServerError;
use crate::match_coordinator::MatchCoordinator;
use log::{debug, error, info, warn};
use shared::locomotion::MoveIntent;
use shared::roles::RoleTable;
use shared::{Packet, PeerId, PeerSession, Rpc, RpcTarget, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: PeerId },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<PeerId>,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub tick_duration: Duration,
    pub max_clients: usize,
    /// Remote peers that must connect before readiness is awaited
    pub expected_peers: usize,
    /// Seeds role assignment and the host's spawn placement
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            tick_duration: Duration::from_millis(16),
            max_clients: 16,
            expected_peers: 0,
            seed: None,
        }
    }
}

/// The server-authoritative peer
///
/// Routes calls between clients, keeps the buffered-call log, runs the
/// match start and plays as `PeerId::SERVER` through its own session.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    host: PeerSession,
    buffered: BufferedRpcs,
    coordinator: MatchCoordinator,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(&config.addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let host = PeerSession::new(PeerId::SERVER, config.seed)
            .with_chat_identity("Host", [1.0, 0.85, 0.2]);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            host,
            buffered: BufferedRpcs::new(),
            coordinator: MatchCoordinator::new(config.expected_peers, config.seed),
            tick_duration: config.tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender for control messages; `ServerMessage::Shutdown` stops [`Server::run`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn host(&self) -> &PeerSession {
        &self.host
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
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
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to {}: {}", client_id, e);
                            }
                        }
                    }
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
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<PeerId>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn send_to_peer(&self, peer: PeerId, packet: Packet) {
        let addr = {
            let clients = self.clients.read().await;
            clients.addr_of(peer)
        };
        match addr {
            Some(addr) => self.send_packet(packet, addr),
            None => debug!("{} for unknown {} dropped", packet.kind(), peer),
        }
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        let clients = self.clients.read().await;
        clients.peer_ids()
    }

    /// Processes one incoming datagram
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => self.handle_connect(client_version, addr).await,

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(client_id) = client_id {
                    self.handle_departure(client_id).await;
                }
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                clients.touch(addr);
            }

            Packet::Sample { entity, sample } => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.touch(addr)
                };
                let Some(client_id) = client_id else {
                    return;
                };
                if entity != client_id {
                    warn!("{} sent a sample for {}; dropped", client_id, entity);
                    return;
                }
                let now = self.host.clock();
                self.host.apply_sample(entity, sample, now);
                self.broadcast_packet(Packet::Sample { entity, sample }, Some(client_id));
            }

            Packet::Call { target, rpc } => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.touch(addr)
                };
                match client_id {
                    Some(client_id) => self.route_call(client_id, target, rpc).await,
                    None => warn!("{} from unconnected {} dropped", rpc.name(), addr),
                }
            }

            other => {
                warn!("Unexpected {} packet from {}", other.kind(), addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };
        if let Some(existing_id) = existing_client_id {
            info!("Removing existing {} from {}", existing_id, addr);
            self.handle_departure(existing_id).await;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };
        let Some(client_id) = client_id else {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
                addr,
            );
            return;
        };

        self.send_packet(Packet::Connected { peer_id: client_id }, addr);
        for (sender, rpc) in self.buffered.replay() {
            self.send_packet(
                Packet::Deliver {
                    sender: *sender,
                    rpc: rpc.clone(),
                },
                addr,
            );
        }

        let connected = self.connected_peers().await;
        if let Some(table) = self.coordinator.peers_changed(&connected) {
            self.distribute_roles(table).await;
        }
    }

    async fn handle_departure(&mut self, client_id: PeerId) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
        }

        let purged = self.buffered.purge(client_id);
        if purged > 0 {
            debug!("Purged {} buffered calls of {}", purged, client_id);
        }

        if let Some(table) = self.coordinator.remove_peer(client_id) {
            self.distribute_roles(table).await;
        }

        let left = Rpc::PeerLeft { peer: client_id };
        if let Err(e) = self.host.handle_rpc(PeerId::SERVER, left.clone()) {
            warn!("Host could not process departure of {}: {}", client_id, e);
        }
        self.broadcast_packet(
            Packet::Deliver {
                sender: PeerId::SERVER,
                rpc: left,
            },
            None,
        );
    }

    /// Routes a call made by a remote peer
    async fn route_call(&mut self, sender: PeerId, target: RpcTarget, rpc: Rpc) {
        debug!("{} from {} to {:?}", rpc.name(), sender, target);
        match target {
            RpcTarget::Peer(peer) if peer.is_server() => self.deliver_to_host(sender, rpc).await,
            RpcTarget::Peer(peer) => {
                self.send_to_peer(peer, Packet::Deliver { sender, rpc }).await;
            }
            RpcTarget::Others => {
                self.broadcast_packet(
                    Packet::Deliver {
                        sender,
                        rpc: rpc.clone(),
                    },
                    Some(sender),
                );
                self.deliver_to_host(sender, rpc).await;
            }
            RpcTarget::AllBuffered => {
                self.buffered.record(sender, rpc.clone());
                self.broadcast_packet(
                    Packet::Deliver {
                        sender,
                        rpc: rpc.clone(),
                    },
                    Some(sender),
                );
                self.deliver_to_host(sender, rpc).await;
            }
        }
        self.flush_host_outbox().await;
    }

    async fn deliver_to_host(&mut self, sender: PeerId, rpc: Rpc) {
        if rpc == Rpc::ClientReady {
            if let Some(table) = self.coordinator.mark_ready(sender) {
                self.distribute_roles(table).await;
            }
        }
        if let Err(e) = self.host.handle_rpc(sender, rpc) {
            warn!("Host rejected call from {}: {}", sender, e);
        }
    }

    /// Sends each participant its role; the host applies its own directly
    async fn distribute_roles(&mut self, table: RoleTable) {
        for (peer, role) in table.iter() {
            if peer.is_server() {
                if let Err(e) = self.host.assign_role(*role) {
                    error!("Host could not take role {}: {}", role, e);
                }
            } else {
                self.send_to_peer(
                    *peer,
                    Packet::Deliver {
                        sender: PeerId::SERVER,
                        rpc: Rpc::AssignRole { role: *role },
                    },
                )
                .await;
            }
        }
        self.flush_host_outbox().await;
    }

    /// Hands the host session's queued calls to the transport
    async fn flush_host_outbox(&mut self) {
        let calls: Vec<_> = self.host.outbox().drain().collect();
        for call in calls {
            let packet = Packet::Deliver {
                sender: PeerId::SERVER,
                rpc: call.rpc.clone(),
            };
            match call.target {
                RpcTarget::Peer(peer) => self.send_to_peer(peer, packet).await,
                RpcTarget::Others => self.broadcast_packet(packet, None),
                RpcTarget::AllBuffered => {
                    self.buffered.record(PeerId::SERVER, call.rpc);
                    self.broadcast_packet(packet, None);
                }
            }
        }
    }

    /// One host tick: local simulation, then the host avatar's sample
    async fn tick(&mut self, dt: f32) {
        self.host.physics_tick(dt, &MoveIntent::default());
        self.host.frame_tick(dt);
        if let Some((entity, sample)) = self.host.write_samples() {
            self.broadcast_packet(Packet::Sample { entity, sample }, None);
        }
        self.flush_host_outbox().await;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        if let Some(table) = self.coordinator.peers_changed(&[]) {
            self.distribute_roles(table).await;
        }

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("{} timed out", client_id);
                            self.handle_departure(client_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.tick(dt).await;
                    ticks += 1;

                    if ticks % 300 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };
                        debug!(
                            "Tick {}: {} clients, {} avatars, {} buffered calls",
                            ticks,
                            client_count,
                            self.host.avatar_count(),
                            self.buffered.len()
                        );
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
    use glam::Vec3;
    use shared::replication::{Body, ReplicationSample};
    use shared::Role;

    async fn test_server(expected_peers: usize) -> Server {
        Server::new(ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            expected_peers,
            seed: Some(7),
            ..ServerConfig::default()
        })
        .await
        .unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn drain_outgoing(server: &mut Server) -> Vec<GameMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = server.game_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn sent_to(messages: &[GameMessage], target: SocketAddr) -> Vec<Packet> {
        messages
            .iter()
            .filter_map(|message| match message {
                GameMessage::SendPacket { packet, addr } if *addr == target => {
                    Some(packet.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn broadcasts(messages: &[GameMessage]) -> Vec<(Packet, Option<PeerId>)> {
        messages
            .iter()
            .filter_map(|message| match message {
                GameMessage::BroadcastPacket { packet, exclude } => {
                    Some((packet.clone(), *exclude))
                }
                _ => None,
            })
            .collect()
    }

    async fn connect(server: &mut Server, port: u16) {
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(port),
            )
            .await;
    }

    #[tokio::test]
    async fn test_connect_assigns_peer_id() {
        let mut server = test_server(4).await;
        connect(&mut server, 9001).await;

        let messages = drain_outgoing(&mut server);
        assert_eq!(
            sent_to(&messages, addr(9001)),
            vec![Packet::Connected {
                peer_id: PeerId(1)
            }]
        );
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let mut server = test_server(4).await;
        server
            .handle_packet(Packet::Connect { client_version: 99 }, addr(9001))
            .await;

        let messages = drain_outgoing(&mut server);
        assert!(matches!(
            sent_to(&messages, addr(9001)).as_slice(),
            [Packet::Disconnected { .. }]
        ));
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut server = Server::new(ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            max_clients: 1,
            expected_peers: 4,
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        connect(&mut server, 9001).await;
        connect(&mut server, 9002).await;

        let messages = drain_outgoing(&mut server);
        assert_eq!(
            sent_to(&messages, addr(9002)),
            vec![Packet::Disconnected {
                reason: "Server full".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_ready_peers_receive_roles_and_host_spawns() {
        let mut server = test_server(1).await;
        connect(&mut server, 9001).await;
        drain_outgoing(&mut server);

        server
            .handle_packet(
                Packet::Call {
                    target: RpcTarget::Peer(PeerId::SERVER),
                    rpc: Rpc::ClientReady,
                },
                addr(9001),
            )
            .await;

        let messages = drain_outgoing(&mut server);
        let delivered = sent_to(&messages, addr(9001));
        assert!(matches!(
            delivered.as_slice(),
            [Packet::Deliver {
                sender: PeerId::SERVER,
                rpc: Rpc::AssignRole { .. }
            }]
        ));

        let host_avatar = server.host().local_avatar().unwrap();
        assert!(broadcasts(&messages).iter().any(|(packet, exclude)| {
            exclude.is_none()
                && matches!(packet, Packet::Deliver {
                    sender: PeerId::SERVER,
                    rpc: Rpc::AvatarSpawned { role, .. }
                } if *role == host_avatar.role)
        }));
        assert_eq!(server.buffered.len(), 1);
    }

    #[tokio::test]
    async fn test_buffered_calls_replayed_to_late_joiner() {
        let mut server = test_server(4).await;
        connect(&mut server, 9001).await;
        let spawned = Rpc::AvatarSpawned {
            position: Vec3::new(1.0, 2.0, 3.0),
            role: Role::Peasant,
        };
        server
            .handle_packet(
                Packet::Call {
                    target: RpcTarget::AllBuffered,
                    rpc: spawned.clone(),
                },
                addr(9001),
            )
            .await;
        assert!(server.host().avatar(PeerId(1)).is_some());
        drain_outgoing(&mut server);

        connect(&mut server, 9002).await;
        let messages = drain_outgoing(&mut server);
        assert_eq!(
            sent_to(&messages, addr(9002)),
            vec![
                Packet::Connected {
                    peer_id: PeerId(2)
                },
                Packet::Deliver {
                    sender: PeerId(1),
                    rpc: spawned
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_departure_purges_buffer_and_announces() {
        let mut server = test_server(4).await;
        connect(&mut server, 9001).await;
        server
            .handle_packet(
                Packet::Call {
                    target: RpcTarget::AllBuffered,
                    rpc: Rpc::AvatarSpawned {
                        position: Vec3::ZERO,
                        role: Role::Survivor,
                    },
                },
                addr(9001),
            )
            .await;
        drain_outgoing(&mut server);

        server.handle_packet(Packet::Disconnect, addr(9001)).await;

        assert!(server.buffered.is_empty());
        assert!(server.host().avatar(PeerId(1)).is_none());
        let messages = drain_outgoing(&mut server);
        assert_eq!(
            broadcasts(&messages),
            vec![(
                Packet::Deliver {
                    sender: PeerId::SERVER,
                    rpc: Rpc::PeerLeft { peer: PeerId(1) }
                },
                None
            )]
        );
    }

    #[tokio::test]
    async fn test_samples_are_relayed_to_others_only() {
        let mut server = test_server(4).await;
        connect(&mut server, 9001).await;
        drain_outgoing(&mut server);

        let sample = ReplicationSample::from_body(&Body::at(Vec3::ONE));
        server
            .handle_packet(
                Packet::Sample {
                    entity: PeerId(2),
                    sample,
                },
                addr(9001),
            )
            .await;
        assert!(drain_outgoing(&mut server).is_empty());

        server
            .handle_packet(
                Packet::Sample {
                    entity: PeerId(1),
                    sample,
                },
                addr(9001),
            )
            .await;
        assert_eq!(
            broadcasts(&drain_outgoing(&mut server)),
            vec![(
                Packet::Sample {
                    entity: PeerId(1),
                    sample
                },
                Some(PeerId(1))
            )]
        );
    }

    #[tokio::test]
    async fn test_calls_to_others_reach_host_and_peers() {
        let mut server = test_server(4).await;
        connect(&mut server, 9001).await;
        connect(&mut server, 9002).await;
        drain_outgoing(&mut server);

        server
            .handle_packet(
                Packet::Call {
                    target: RpcTarget::Others,
                    rpc: Rpc::ChatMessage {
                        sender: "peer#1".to_string(),
                        text: "anyone there?".to_string(),
                        color: [0.5, 0.5, 0.5],
                    },
                },
                addr(9001),
            )
            .await;

        assert_eq!(server.host().chat().last().unwrap().text, "anyone there?");
        let relayed = broadcasts(&drain_outgoing(&mut server));
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].1, Some(PeerId(1)));
    }
}
