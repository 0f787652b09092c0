//! Connected-peer bookkeeping for the authoritative server
//!
//! This module tracks who is connected and from where:
//! - Peer lifecycle (connect, disconnect, timeout)
//! - Address lookup for incoming datagrams
//! - Capacity enforcement
//!
//! Peer ids are handed out from 1 upward; `PeerId::SERVER` is reserved for
//! the host itself and never appears here.

use log::info;
use shared::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a peer is considered gone
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected remote peer
#[derive(Debug)]
pub struct Client {
    /// Identifier assigned by the server
    pub id: PeerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from this peer
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing arrived from this peer within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected peers
///
/// Enforces the capacity limit and maps datagram source addresses back to
/// peer ids so every incoming packet can be attributed to its sender.
pub struct ClientManager {
    /// Connected peers indexed by id
    clients: HashMap<PeerId, Client>,
    /// Next id for a new connection
    next_client_id: u32,
    /// Maximum number of concurrent peers allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new connection
    ///
    /// Returns the new peer id, or None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = PeerId(self.next_client_id);
        self.next_client_id += 1;

        info!("{} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a peer; returns false if it was already gone
    pub fn remove_client(&mut self, client_id: &PeerId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("{} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks the peer at `addr` as alive and returns its id
    pub fn touch(&mut self, addr: SocketAddr) -> Option<PeerId> {
        self.clients
            .values_mut()
            .find(|client| client.addr == addr)
            .map(|client| {
                client.touch();
                client.id
            })
    }

    pub fn addr_of(&self, client_id: PeerId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Removes and returns every peer silent for longer than [`CLIENT_TIMEOUT`]
    pub fn check_timeouts(&mut self) -> Vec<PeerId> {
        let timed_out: Vec<PeerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(CLIENT_TIMEOUT))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// All peer ids and addresses, for broadcasting
    pub fn get_client_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Connected peer ids in ascending order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
