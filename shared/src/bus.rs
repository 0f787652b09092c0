//! Remote procedure calls and the message bus they travel on
//!
//! Every state change that other peers must mirror is expressed as an
//! [`Rpc`] addressed to an [`RpcTarget`]. Game logic only ever talks to the
//! [`MessageBus`] trait; the transport decides how the calls leave the
//! process. Delivery is fire-and-forget: no acknowledgement, no retry and no
//! sequence numbers are attached here.

use crate::item::ItemId;
use crate::peer::PeerId;
use crate::roles::Role;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Recipient set of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcTarget {
    /// One specific peer
    Peer(PeerId),
    /// Every connected peer except the sender
    Others,
    /// Every peer, and replayed to peers that join later
    AllBuffered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rpc {
    ClientReady,
    AssignRole {
        role: Role,
    },
    AvatarSpawned {
        position: Vec3,
        role: Role,
    },
    Pickup {
        item: ItemId,
    },
    Drop {
        item: ItemId,
    },
    Swap,
    ChargeStarted,
    Throw {
        item: ItemId,
        percent: f32,
    },
    Swing,
    ChatMessage {
        sender: String,
        text: String,
        color: [f32; 3],
    },
    PeerLeft {
        peer: PeerId,
    },
}

impl Rpc {
    /// Short procedure name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Rpc::ClientReady => "ClientReady",
            Rpc::AssignRole { .. } => "AssignRole",
            Rpc::AvatarSpawned { .. } => "AvatarSpawned",
            Rpc::Pickup { .. } => "Pickup",
            Rpc::Drop { .. } => "Drop",
            Rpc::Swap => "Swap",
            Rpc::ChargeStarted => "ChargeStarted",
            Rpc::Throw { .. } => "Throw",
            Rpc::Swing => "Swing",
            Rpc::ChatMessage { .. } => "ChatMessage",
            Rpc::PeerLeft { .. } => "PeerLeft",
        }
    }
}

/// Sending half of the transport as seen by game logic
pub trait MessageBus {
    fn send(&mut self, target: RpcTarget, rpc: Rpc);
}

/// A call waiting to be handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingCall {
    pub target: RpcTarget,
    pub rpc: Rpc,
}

/// In-process queue of outgoing calls
///
/// Sessions write into it during ticks and handlers; the network layer
/// drains it once per loop iteration.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<OutgoingCall>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = OutgoingCall> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn last(&self) -> Option<&OutgoingCall> {
        self.queue.back()
    }
}

impl MessageBus for Outbox {
    fn send(&mut self, target: RpcTarget, rpc: Rpc) {
        self.queue.push_back(OutgoingCall { target, rpc });
    }
}
