//! Decides when the match starts and who plays what
//!
//! The barrier is armed with the connected peers once their count reaches
//! the configured expectation. When every one of them has reported ready
//! the host and that snapshot are handed to `assign_roles`, exactly once.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::roles::{assign_roles, ReadinessBarrier, RoleTable};
use shared::PeerId;

pub struct MatchCoordinator {
    barrier: ReadinessBarrier,
    expected_peers: usize,
    rng: StdRng,
}

impl MatchCoordinator {
    /// `expected_peers` remote peers must connect before the barrier arms;
    /// zero starts a solo match as soon as the server is up
    pub fn new(expected_peers: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            barrier: ReadinessBarrier::new(),
            expected_peers,
            rng,
        }
    }

    pub fn has_started(&self) -> bool {
        self.barrier.has_fired()
    }

    pub fn is_armed(&self) -> bool {
        self.barrier.is_armed()
    }

    /// Called whenever the connected set changes
    pub fn peers_changed(&mut self, connected: &[PeerId]) -> Option<RoleTable> {
        if self.barrier.is_armed() || connected.len() < self.expected_peers {
            return None;
        }
        info!(
            "{} of {} expected peers connected; waiting for ready",
            connected.len(),
            self.expected_peers
        );
        let snapshot = self.barrier.arm(connected.iter().copied())?;
        Some(self.assign(snapshot))
    }

    pub fn mark_ready(&mut self, peer: PeerId) -> Option<RoleTable> {
        let snapshot = self.barrier.mark_ready(peer)?;
        Some(self.assign(snapshot))
    }

    pub fn remove_peer(&mut self, peer: PeerId) -> Option<RoleTable> {
        let snapshot = self.barrier.remove_peer(peer)?;
        Some(self.assign(snapshot))
    }

    fn assign(&mut self, snapshot: Vec<PeerId>) -> RoleTable {
        let mut eligible = Vec::with_capacity(snapshot.len() + 1);
        eligible.push(PeerId::SERVER);
        eligible.extend(snapshot);
        info!("All {} participants ready; assigning roles", eligible.len());
        assign_roles(&eligible, &mut self.rng)
    }
}
