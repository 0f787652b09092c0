//! Hidden role assignment and the readiness barrier that gates it
//!
//! Assignment is a pure function of an immutable snapshot of eligible peers
//! and an RNG, so peers connecting or leaving while it runs cannot alias
//! into the selection. The server builds the snapshot from the readiness
//! barrier once it fires and then delivers each entry of the resulting
//! [`RoleTable`] privately.

use crate::peer::PeerId;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minimum number of peers left after the Monster is chosen for a Cultist to exist
pub const CULTIST_THRESHOLD: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Role {
    Monster,
    Cultist,
    Priest,
    Assassin,
    Peasant,
    Survivor,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role name: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Monster,
        Role::Cultist,
        Role::Priest,
        Role::Assassin,
        Role::Peasant,
        Role::Survivor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Monster => "Monster",
            Role::Cultist => "Cultist",
            Role::Priest => "Priest",
            Role::Assassin => "Assassin",
            Role::Peasant => "Peasant",
            Role::Survivor => "Survivor",
        }
    }

    /// Text pushed into the owning avatar's role panel
    pub fn description(&self) -> String {
        format!("You're a {}", self.name())
    }

    pub fn is_monster(&self) -> bool {
        *self == Role::Monster
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.name() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.name().to_string()
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Result of one assignment run, in the order roles were handed out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleTable {
    entries: Vec<(PeerId, Role)>,
}

impl RoleTable {
    fn push(&mut self, peer: PeerId, role: Role) {
        debug!("Creating {} for {}", role, peer);
        self.entries.push((peer, role));
    }

    pub fn role_of(&self, peer: PeerId) -> Option<Role> {
        self.entries
            .iter()
            .find(|(p, _)| *p == peer)
            .map(|(_, role)| *role)
    }

    pub fn count(&self, role: Role) -> usize {
        self.entries.iter().filter(|(_, r)| *r == role).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PeerId, Role)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn take_random<R: Rng + ?Sized>(pool: &mut Vec<PeerId>, rng: &mut R) -> PeerId {
    let index = rng.gen_range(0..pool.len());
    pool.swap_remove(index)
}

/// Distributes one role to every eligible peer
///
/// One Monster; one Cultist when at least [`CULTIST_THRESHOLD`] peers remain
/// after that; then half of the remainder (rounded down) is drawn into the
/// Priest/Assassin pool and everyone left into Peasant/Survivor, each member
/// choosing its side of the pool with an unweighted coin flip. Duplicate ids
/// in the snapshot are assigned once.
pub fn assign_roles<R: Rng + ?Sized>(eligible: &[PeerId], rng: &mut R) -> RoleTable {
    let mut seen = BTreeSet::new();
    let mut pool: Vec<PeerId> = eligible
        .iter()
        .copied()
        .filter(|peer| seen.insert(*peer))
        .collect();

    let mut table = RoleTable::default();
    if pool.is_empty() {
        return table;
    }

    table.push(take_random(&mut pool, rng), Role::Monster);

    if pool.len() >= CULTIST_THRESHOLD {
        table.push(take_random(&mut pool, rng), Role::Cultist);
    }

    let special_count = pool.len() / 2;
    for _ in 0..special_count {
        let peer = take_random(&mut pool, rng);
        let role = if rng.gen_bool(0.5) {
            Role::Priest
        } else {
            Role::Assassin
        };
        table.push(peer, role);
    }

    while !pool.is_empty() {
        let peer = take_random(&mut pool, rng);
        let role = if rng.gen_bool(0.5) {
            Role::Peasant
        } else {
            Role::Survivor
        };
        table.push(peer, role);
    }

    table
}

/// Server-held gate that releases role assignment once every expected peer is ready
///
/// Ready signals may arrive before the barrier is armed; they are kept and
/// counted when it is. Peers that disconnect before the barrier fires are
/// dropped from both the expected and the ready set, and the barrier is
/// re-evaluated, so a departure can be what releases it.
#[derive(Debug, Default)]
pub struct ReadinessBarrier {
    expected: Option<BTreeSet<PeerId>>,
    ready: BTreeSet<PeerId>,
    fired: bool,
}

impl ReadinessBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the set of peers the barrier waits for
    ///
    /// Returns the eligible snapshot if that set is already satisfied,
    /// including the empty set.
    pub fn arm(&mut self, expected: impl IntoIterator<Item = PeerId>) -> Option<Vec<PeerId>> {
        if self.fired || self.expected.is_some() {
            return None;
        }
        self.expected = Some(expected.into_iter().collect());
        self.try_fire()
    }

    pub fn mark_ready(&mut self, peer: PeerId) -> Option<Vec<PeerId>> {
        if self.fired {
            return None;
        }
        self.ready.insert(peer);
        self.try_fire()
    }

    pub fn remove_peer(&mut self, peer: PeerId) -> Option<Vec<PeerId>> {
        if self.fired {
            return None;
        }
        self.ready.remove(&peer);
        if let Some(expected) = self.expected.as_mut() {
            expected.remove(&peer);
        }
        self.try_fire()
    }

    pub fn is_armed(&self) -> bool {
        self.expected.is_some()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    fn try_fire(&mut self) -> Option<Vec<PeerId>> {
        let expected = self.expected.as_ref()?;
        if !expected.iter().all(|peer| self.ready.contains(peer)) {
            return None;
        }
        self.fired = true;
        Some(expected.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn peers(n: u32) -> Vec<PeerId> {
        (0..n).map(PeerId).collect()
    }

    fn assert_every_peer_once(table: &RoleTable, eligible: &[PeerId]) {
        assert_eq!(table.len(), eligible.len());
        for peer in eligible {
            assert!(table.role_of(*peer).is_some(), "{} has no role", peer);
        }
    }

    #[test]
    fn test_eight_peers_get_monster_cultist_and_even_pools() {
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let eligible = peers(8);
            let table = assign_roles(&eligible, &mut rng);

            assert_every_peer_once(&table, &eligible);
            assert_eq!(table.count(Role::Monster), 1);
            assert_eq!(table.count(Role::Cultist), 1);
            assert_eq!(table.count(Role::Priest) + table.count(Role::Assassin), 3);
            assert_eq!(table.count(Role::Peasant) + table.count(Role::Survivor), 3);
        }
    }

    #[test]
    fn test_three_peers_have_no_cultist() {
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let eligible = peers(3);
            let table = assign_roles(&eligible, &mut rng);

            assert_every_peer_once(&table, &eligible);
            assert_eq!(table.count(Role::Monster), 1);
            assert_eq!(table.count(Role::Cultist), 0);
            assert_eq!(table.count(Role::Priest) + table.count(Role::Assassin), 1);
            assert_eq!(table.count(Role::Peasant) + table.count(Role::Survivor), 1);
        }
    }

    #[test]
    fn test_seven_peers_is_first_count_with_cultist() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(assign_roles(&peers(6), &mut rng).count(Role::Cultist), 0);
        assert_eq!(assign_roles(&peers(7), &mut rng).count(Role::Cultist), 1);
    }

    #[test]
    fn test_two_peers_fall_into_normal_pool_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let table = assign_roles(&peers(2), &mut rng);

        assert_eq!(table.count(Role::Monster), 1);
        assert_eq!(table.count(Role::Priest) + table.count(Role::Assassin), 0);
        assert_eq!(table.count(Role::Peasant) + table.count(Role::Survivor), 1);
    }

    #[test]
    fn test_solo_and_empty_snapshots() {
        let mut rng = StdRng::seed_from_u64(3);
        let solo = assign_roles(&[PeerId::SERVER], &mut rng);
        assert_eq!(solo.role_of(PeerId::SERVER), Some(Role::Monster));

        assert!(assign_roles(&[], &mut rng).is_empty());
    }

    #[test]
    fn test_duplicate_peers_assigned_once() {
        let mut rng = StdRng::seed_from_u64(9);
        let table = assign_roles(&[PeerId(1), PeerId(1), PeerId(2)], &mut rng);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_monster_is_not_biased_toward_one_peer() {
        let mut rng = StdRng::seed_from_u64(42);
        let eligible = peers(4);
        let mut monsters = [0usize; 4];
        for _ in 0..4000 {
            let table = assign_roles(&eligible, &mut rng);
            let (peer, _) = table
                .iter()
                .find(|(_, role)| role.is_monster())
                .copied()
                .unwrap();
            monsters[peer.0 as usize] += 1;
        }
        for count in monsters {
            assert!((800..1200).contains(&count), "skewed count {}", count);
        }
    }

    #[test]
    fn test_role_string_round_trip() {
        for role in Role::ALL {
            let text: String = role.into();
            assert_eq!(Role::try_from(text).unwrap(), role);
        }
        assert_eq!(
            "Wizard".parse::<Role>(),
            Err(UnknownRole("Wizard".to_string()))
        );
        assert_eq!(Role::Assassin.description(), "You're a Assassin");
    }

    #[test]
    fn test_barrier_fires_when_all_expected_ready() {
        let mut barrier = ReadinessBarrier::new();
        assert_eq!(barrier.arm([PeerId(1), PeerId(2)]), None);
        assert_eq!(barrier.mark_ready(PeerId(1)), None);

        let snapshot = barrier.mark_ready(PeerId(2)).unwrap();
        assert_eq!(snapshot, vec![PeerId(1), PeerId(2)]);
        assert!(barrier.has_fired());

        // Fires exactly once
        assert_eq!(barrier.mark_ready(PeerId(3)), None);
    }

    #[test]
    fn test_barrier_with_no_expected_peers_fires_on_arm() {
        let mut barrier = ReadinessBarrier::new();
        assert_eq!(barrier.arm(Vec::new()), Some(Vec::new()));
    }

    #[test]
    fn test_barrier_keeps_early_ready_signals() {
        let mut barrier = ReadinessBarrier::new();
        assert_eq!(barrier.mark_ready(PeerId(1)), None);
        assert!(!barrier.is_armed());
        assert_eq!(barrier.arm([PeerId(1)]), Some(vec![PeerId(1)]));
    }

    #[test]
    fn test_barrier_excludes_disconnected_peer() {
        let mut barrier = ReadinessBarrier::new();
        barrier.arm([PeerId(1), PeerId(2), PeerId(3)]);
        barrier.mark_ready(PeerId(1));
        barrier.mark_ready(PeerId(3));

        let snapshot = barrier.remove_peer(PeerId(2)).unwrap();
        assert_eq!(snapshot, vec![PeerId(1), PeerId(3)]);
    }

    #[test]
    fn test_barrier_forgets_ready_peer_that_left() {
        let mut barrier = ReadinessBarrier::new();
        barrier.arm([PeerId(1), PeerId(2)]);
        barrier.mark_ready(PeerId(1));
        assert_eq!(barrier.remove_peer(PeerId(1)), None);
        assert_eq!(barrier.ready_count(), 0);

        assert_eq!(barrier.mark_ready(PeerId(2)), Some(vec![PeerId(2)]));
    }
}
