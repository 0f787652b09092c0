//! Integration tests for the match components
//!
//! These tests wire several peers together, either through in-process
//! session relays or over real UDP on loopback.

use assert_approx_eq::assert_approx_eq;
use client::network::Client;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::{Server, ServerConfig, ServerMessage};
use shared::roles::assign_roles;
use shared::{Packet, PeerId, PeerSession, Role, Rpc, RpcTarget, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Delivers queued calls between sessions until every outbox is empty
fn relay(sessions: &mut [PeerSession]) {
    loop {
        let mut pending = Vec::new();
        for session in sessions.iter_mut() {
            let sender = session.local_id();
            pending.extend(session.outbox().drain().map(|call| (sender, call)));
        }
        if pending.is_empty() {
            return;
        }

        for (sender, call) in pending {
            for session in sessions.iter_mut() {
                let receiver = session.local_id();
                let addressed = match call.target {
                    RpcTarget::Peer(peer) => peer == receiver,
                    RpcTarget::Others | RpcTarget::AllBuffered => receiver != sender,
                };
                if addressed {
                    session.handle_rpc(sender, call.rpc.clone()).unwrap();
                }
            }
        }
    }
}

/// IN-PROCESS SESSION TESTS
mod session_tests {
    use super::*;

    fn lobby() -> Vec<PeerSession> {
        [PeerId::SERVER, PeerId(1), PeerId(2)]
            .into_iter()
            .enumerate()
            .map(|(i, peer)| PeerSession::new(peer, Some(i as u64)))
            .collect()
    }

    #[test]
    fn test_every_peer_sees_every_avatar() {
        let mut sessions = lobby();
        let peers: Vec<PeerId> = sessions.iter().map(|s| s.local_id()).collect();
        let table = assign_roles(&peers, &mut StdRng::seed_from_u64(3));

        for session in sessions.iter_mut() {
            let role = table.role_of(session.local_id()).unwrap();
            session.assign_role(role).unwrap();
        }
        relay(&mut sessions);

        assert_eq!(table.count(Role::Monster), 1);
        for session in &sessions {
            assert_eq!(session.avatar_count(), 3);
            for peer in &peers {
                let avatar = session.avatar(*peer).unwrap();
                assert_eq!(avatar.role, table.role_of(*peer).unwrap());
                assert_eq!(avatar.hud.is_some(), *peer == session.local_id());
            }
        }
    }

    #[test]
    fn test_owner_pose_reaches_observers() {
        let mut sessions = lobby();
        sessions[0].assign_role(Role::Monster).unwrap();
        sessions[1].assign_role(Role::Survivor).unwrap();
        relay(&mut sessions);

        let target = Vec3::new(3.0, 1.0, 10.0);
        sessions[1].avatar_mut(PeerId(1)).unwrap().body.position = target;
        let (entity, sample) = sessions[1].write_samples().unwrap();

        for observer in [0, 2] {
            assert!(sessions[observer].apply_sample(entity, sample, 0.5));
            sessions[observer].frame_tick(0.3);
            sessions[observer].frame_tick(0.3);

            let position = sessions[observer].avatar(entity).unwrap().body.position;
            assert_approx_eq!(position.x, target.x, 1e-4);
            assert_approx_eq!(position.z, target.z, 1e-4);
        }
    }

    #[test]
    fn test_chat_reaches_everyone_else() {
        let mut sessions = lobby();
        sessions[2].say("Stay together.");
        relay(&mut sessions);

        for session in &sessions {
            let entry = session.chat().last().unwrap();
            assert_eq!(entry.text, "Stay together.");
        }
    }

    #[test]
    fn test_departure_removes_avatar_everywhere() {
        let mut sessions = lobby();
        for session in sessions.iter_mut() {
            session.assign_role(Role::Survivor).unwrap();
        }
        relay(&mut sessions);

        for session in sessions.iter_mut().filter(|s| s.local_id() != PeerId(2)) {
            session
                .handle_rpc(PeerId::SERVER, Rpc::PeerLeft { peer: PeerId(2) })
                .unwrap();
            assert_eq!(session.avatar_count(), 2);
            assert!(session.avatar(PeerId(2)).is_none());
        }
    }
}

/// LOOPBACK NETWORK TESTS
mod network_tests {
    use super::*;

    async fn start_server(expected_peers: usize) -> Server {
        Server::new(ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            tick_duration: Duration::from_millis(10),
            expected_peers,
            seed: Some(11),
            ..ServerConfig::default()
        })
        .await
        .unwrap()
    }

    async fn recv_packet(socket: &UdpSocket) -> Packet {
        let mut buffer = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .expect("no packet within two seconds")
            .unwrap();
        Packet::decode(&buffer[..len]).unwrap()
    }

    async fn send(socket: &UdpSocket, packet: Packet) {
        socket.send(&packet.encode().unwrap()).await.unwrap();
    }

    /// Raw peer: waits for its role, skipping host samples and broadcasts
    async fn raw_peer(server_addr: std::net::SocketAddr) -> (PeerId, Role) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(server_addr).await.unwrap();

        send(
            &socket,
            Packet::Connect {
                client_version: PROTOCOL_VERSION,
            },
        )
        .await;
        let peer_id = match recv_packet(&socket).await {
            Packet::Connected { peer_id } => peer_id,
            other => panic!("Expected Connected, got {:?}", other),
        };

        send(
            &socket,
            Packet::Call {
                target: RpcTarget::Peer(PeerId::SERVER),
                rpc: Rpc::ClientReady,
            },
        )
        .await;

        loop {
            if let Packet::Deliver {
                sender,
                rpc: Rpc::AssignRole { role },
            } = recv_packet(&socket).await
            {
                assert!(sender.is_server());
                return (peer_id, role);
            }
        }
    }

    #[tokio::test]
    async fn test_ready_peer_receives_role_over_udp() {
        let mut server = start_server(1).await;
        let server_addr = server.local_addr().unwrap();
        let control = server.control();

        let (_, peer) = tokio::join!(server.run(), async {
            let peer = raw_peer(server_addr).await;
            control.send(ServerMessage::Shutdown).unwrap();
            peer
        });

        let (peer_id, role) = peer;
        assert_eq!(peer_id, PeerId(1));
        // Two participants: the host and this peer, exactly one monster
        let host_role = server.host().local_avatar().unwrap().role;
        assert_ne!(host_role.is_monster(), role.is_monster());
    }

    #[tokio::test]
    async fn test_mismatched_version_is_refused() {
        let mut server = start_server(1).await;
        let server_addr = server.local_addr().unwrap();
        let control = server.control();

        let (_, reply) = tokio::join!(server.run(), async {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.connect(server_addr).await.unwrap();
            send(
                &socket,
                Packet::Connect {
                    client_version: PROTOCOL_VERSION + 1,
                },
            )
            .await;
            let reply = recv_packet(&socket).await;
            control.send(ServerMessage::Shutdown).unwrap();
            reply
        });

        assert!(matches!(reply, Packet::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_client_joins_and_both_sides_see_two_avatars() {
        let mut server = start_server(1).await;
        let server_addr = server.local_addr().unwrap().to_string();
        let control = server.control();
        let mut client = Client::new(&server_addr, 0, Some(4), Duration::from_millis(10))
            .await
            .unwrap();

        let (_, result) = tokio::join!(server.run(), async {
            let result = client
                .run_until(sleep(Duration::from_millis(1500)))
                .await
                .map_err(|e| e.to_string());
            control.send(ServerMessage::Shutdown).unwrap();
            result
        });
        result.unwrap();

        let session = client.session().unwrap();
        assert!(session.role_hud().is_some());
        assert_eq!(session.avatar_count(), 2);
        assert!(session.avatar(PeerId::SERVER).is_some());
        assert_eq!(server.host().avatar_count(), 2);
    }
}
