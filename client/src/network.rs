use crate::driver::Driver;
use log::{debug, error, info, warn};
use shared::{Packet, PeerId, PeerSession, Rpc, RpcTarget, PROTOCOL_VERSION};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    peer_id: Option<PeerId>,
    connected: bool,

    session: Option<PeerSession>,
    driver: Driver,
    seed: Option<u64>,

    fake_ping_ms: u64,
    tick_duration: Duration,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        seed: Option<u64>,
        tick_duration: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            peer_id: None,
            connected: false,
            session: None,
            driver: Driver::new(seed),
            seed,
            fake_ping_ms,
            tick_duration,
        })
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn session(&self) -> Option<&PeerSession> {
        self.session.as_ref()
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

        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends every call the session queued since the last flush
    async fn flush_outbox(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let calls: Vec<_> = session.outbox().drain().collect();
        for call in calls {
            self.send_packet(&Packet::Call {
                target: call.target,
                rpc: call.rpc,
            })
            .await?;
        }
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected { peer_id } => {
                info!("Connected! Peer ID: {}", peer_id);
                self.peer_id = Some(peer_id);
                self.connected = true;
                self.session = Some(PeerSession::new(peer_id, self.seed));

                self.send_packet(&Packet::Call {
                    target: RpcTarget::Peer(PeerId::SERVER),
                    rpc: Rpc::ClientReady,
                })
                .await?;
            }

            Packet::Deliver { sender, rpc } => {
                let Some(session) = self.session.as_mut() else {
                    debug!("{} before connection dropped", rpc.name());
                    return Ok(());
                };
                if let Err(e) = session.handle_rpc(sender, rpc) {
                    warn!("Call from {} rejected: {}", sender, e);
                }
                self.flush_outbox().await?;
            }

            Packet::Sample { entity, sample } => {
                if let Some(session) = self.session.as_mut() {
                    let now = session.clock();
                    session.apply_sample(entity, sample, now);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.peer_id = None;
            }

            other => {
                warn!("Unexpected {} packet", other.kind());
            }
        }
        Ok(())
    }

    /// One client tick: scripted input, simulation, then the owner sample
    async fn tick(&mut self, dt: f32) -> Result<(), Box<dyn std::error::Error>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let intent = self.driver.next_intent();
        session.physics_tick(dt, &intent);

        if let Some(phase) = session.local_avatar().map(|avatar| avatar.possession.phase()) {
            if let Some(action) = self.driver.next_action(phase) {
                debug!("Driver: {:?}", action);
                action.perform(session);
            }
        }

        session.frame_tick(dt);
        let sample = session.write_samples();

        if let Some((entity, sample)) = sample {
            self.send_packet(&Packet::Sample { entity, sample }).await?;
        }
        self.flush_outbox().await
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Runs until `stop` resolves or the server drops us
    pub async fn run_until<F: Future>(&mut self, stop: F) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(self.tick_duration);
        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
        let mut last_tick = Instant::now();

        let mut buffer = [0u8; 2048];
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Stopping client");
                    break;
                },

                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match Packet::decode(&buffer[0..len]) {
                                Ok(packet) => {
                                    let refused = matches!(packet, Packet::Disconnected { .. });
                                    self.handle_packet(packet).await?;
                                    if refused {
                                        break;
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
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
            self.connected = false;
        }

        Ok(())
    }
}
