//! Game core shared by the host and every client: identities, remote calls,
//! replication, held items, roles and the per-peer session that ties them
//! together, plus the UDP wire format.

pub mod animation;
pub mod bus;
pub mod chat;
pub mod error;
pub mod item;
pub mod locomotion;
pub mod peer;
pub mod physics;
pub mod possession;
pub mod replication;
pub mod roles;
pub mod session;
pub mod spawn;
pub mod world;

pub use bus::{MessageBus, Outbox, Rpc, RpcTarget};
pub use error::{SessionError, SessionResult};
pub use peer::{Authority, PeerId};
pub use replication::ReplicationSample;
pub use roles::Role;
pub use session::PeerSession;

use serde::{Deserialize, Serialize};

pub const GRAVITY: f32 = 9.81;
pub const CAPSULE_HEIGHT: f32 = 2.0;
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Disconnect,
    Heartbeat,
    /// Replication sample of the avatar owned by `entity`. Sent upstream by
    /// the owner and relayed unchanged to every other peer.
    Sample {
        entity: PeerId,
        sample: ReplicationSample,
    },
    /// Remote call made by the sending client, routed by the server
    Call {
        target: RpcTarget,
        rpc: Rpc,
    },

    Connected {
        peer_id: PeerId,
    },
    Disconnected {
        reason: String,
    },
    /// Remote call delivered on behalf of `sender`
    Deliver {
        sender: PeerId,
        rpc: Rpc,
    },
}

impl Packet {
    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn decode(data: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(data)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "Connect",
            Packet::Disconnect => "Disconnect",
            Packet::Heartbeat => "Heartbeat",
            Packet::Sample { .. } => "Sample",
            Packet::Call { .. } => "Call",
            Packet::Connected { .. } => "Connected",
            Packet::Disconnected { .. } => "Disconnected",
            Packet::Deliver { .. } => "Deliver",
        }
    }
}
