//! Peer identity and per-entity authority tagging

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one connected participant
///
/// The server-authoritative peer is always `PeerId::SERVER`; clients are
/// numbered from 1 in connection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    pub const SERVER: PeerId = PeerId(0);

    pub fn is_server(&self) -> bool {
        *self == Self::SERVER
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_server() {
            write!(f, "peer#server")
        } else {
            write!(f, "peer#{}", self.0)
        }
    }
}

/// Who is allowed to mutate an entity on this peer
///
/// Exactly one peer holds `Owned` for a given entity; every other peer
/// holds `Observed` and treats the entity as a read-only interpolation
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Owned(PeerId),
    Observed,
}

impl Authority {
    /// Builds the tag for an entity owned by `owner`, seen from `local`
    pub fn for_entity(owner: PeerId, local: PeerId) -> Self {
        if owner == local {
            Authority::Owned(local)
        } else {
            Authority::Observed
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Authority::Owned(_))
    }
}
