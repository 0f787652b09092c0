//! One peer's complete local view of the match
//!
//! The host and every client run the same [`PeerSession`]. It holds the
//! avatars as this peer sees them (one owned, the rest observed), the level
//! with its item mirror, and an [`Outbox`] the transport drains. Remote calls
//! come in through [`PeerSession::handle_rpc`]; replication samples through
//! [`PeerSession::apply_sample`].

use crate::bus::{MessageBus, Outbox, Rpc, RpcTarget};
use crate::chat::ChatLog;
use crate::error::{SessionError, SessionResult};
use crate::item::ItemId;
use crate::locomotion::{self, LocomotionConfig, MoveIntent};
use crate::peer::{Authority, PeerId};
use crate::possession::{look_ray, ItemContext, Possession};
use crate::replication::{Body, Direction, InterpolationConfig, ReplicationSample, Replicator};
use crate::roles::Role;
use crate::spawn::{choose_spawn_point, SpawnAnchors, SpawnConfig};
use crate::world::World;
use glam::Vec3;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;

/// Role card shown to the local player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHud {
    pub name: String,
    pub description: String,
}

impl RoleHud {
    pub fn for_role(role: Role) -> Self {
        Self {
            name: role.name().to_string(),
            description: role.description(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Avatar {
    pub body: Body,
    pub replicator: Replicator,
    pub possession: Possession,
    pub role: Role,
    /// Only filled for the locally owned avatar
    pub hud: Option<RoleHud>,
}

impl Avatar {
    fn spawn(
        owner: PeerId,
        local: PeerId,
        role: Role,
        position: Vec3,
        config: InterpolationConfig,
    ) -> Self {
        let authority = Authority::for_entity(owner, local);
        Self {
            body: Body::at(position),
            replicator: Replicator::new(authority, config),
            possession: Possession::new(owner, authority),
            role,
            hud: authority.is_local().then(|| RoleHud::for_role(role)),
        }
    }
}

/// The level every session starts from: flat ground, a few boulders,
/// throwable items around the middle and anchors at the edges
pub fn arena() -> (World, SpawnAnchors) {
    let mut world = World::new()
        .with_obstacle(Vec3::new(6.0, 1.0, 6.0), 1.0)
        .with_obstacle(Vec3::new(-6.0, 1.0, -4.0), 1.5);
    for i in 0..6u32 {
        let angle = i as f32 * std::f32::consts::TAU / 6.0;
        world = world.with_item(
            ItemId(i + 1),
            Vec3::new(angle.cos() * 3.0, 0.2, angle.sin() * 3.0),
        );
    }

    let anchors = SpawnAnchors {
        monster: vec![Vec3::new(0.0, 2.0, 16.0)],
        survivor: vec![
            Vec3::new(0.0, 2.0, -12.0),
            Vec3::new(12.0, 2.0, 0.0),
            Vec3::new(-12.0, 2.0, 0.0),
        ],
    };
    (world, anchors)
}

pub struct PeerSession {
    local: PeerId,
    name: String,
    color: [f32; 3],
    outbox: Outbox,
    world: World,
    avatars: HashMap<PeerId, Avatar>,
    anchors: SpawnAnchors,
    spawn_config: SpawnConfig,
    locomotion: LocomotionConfig,
    interpolation: InterpolationConfig,
    chat: ChatLog,
    rng: StdRng,
    clock: f64,
}

impl PeerSession {
    /// Session on the default arena; `seed` makes spawn placement reproducible
    pub fn new(local: PeerId, seed: Option<u64>) -> Self {
        let (world, anchors) = arena();
        Self::with_level(local, seed, world, anchors)
    }

    pub fn with_level(
        local: PeerId,
        seed: Option<u64>,
        world: World,
        anchors: SpawnAnchors,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            local,
            name: local.to_string(),
            color: [1.0, 1.0, 1.0],
            outbox: Outbox::new(),
            world,
            avatars: HashMap::new(),
            anchors,
            spawn_config: SpawnConfig::default(),
            locomotion: LocomotionConfig::default(),
            interpolation: InterpolationConfig::default(),
            chat: ChatLog::new(),
            rng,
            clock: 0.0,
        }
    }

    pub fn with_spawn_config(mut self, config: SpawnConfig) -> Self {
        self.spawn_config = config;
        self
    }

    pub fn with_interpolation(mut self, config: InterpolationConfig) -> Self {
        self.interpolation = config;
        self
    }

    pub fn with_chat_identity(mut self, name: impl Into<String>, color: [f32; 3]) -> Self {
        self.name = name.into();
        self.color = color;
        self
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn outbox(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    pub fn avatar(&self, peer: PeerId) -> Option<&Avatar> {
        self.avatars.get(&peer)
    }

    pub fn avatar_mut(&mut self, peer: PeerId) -> Option<&mut Avatar> {
        self.avatars.get_mut(&peer)
    }

    pub fn local_avatar(&self) -> Option<&Avatar> {
        self.avatars.get(&self.local)
    }

    pub fn avatar_count(&self) -> usize {
        self.avatars.len()
    }

    pub fn role_hud(&self) -> Option<&RoleHud> {
        self.local_avatar().and_then(|avatar| avatar.hud.as_ref())
    }

    /// Dispatches one call another peer made
    pub fn handle_rpc(&mut self, sender: PeerId, rpc: Rpc) -> SessionResult<()> {
        match rpc {
            Rpc::ClientReady => {
                debug!("{} reported ready", sender);
                Ok(())
            }
            Rpc::AssignRole { role } => {
                if !sender.is_server() {
                    warn!("Ignoring role assignment from non-server {}", sender);
                    return Ok(());
                }
                self.assign_role(role).map(|_| ())
            }
            Rpc::AvatarSpawned { position, role } => {
                self.spawn_observed(sender, role, position);
                Ok(())
            }
            Rpc::ChatMessage {
                sender: name,
                text,
                color,
            } => {
                info!("[chat] {}: {}", name, text);
                self.chat.push(name, text, color);
                Ok(())
            }
            Rpc::PeerLeft { peer } => {
                self.remove_avatar(peer);
                Ok(())
            }
            possession_call => {
                let now = self.clock;
                let avatar = self
                    .avatars
                    .get_mut(&sender)
                    .ok_or(SessionError::UnknownAvatar(sender))?;
                avatar.possession.apply_remote(
                    &possession_call,
                    ItemContext {
                        body: &avatar.body,
                        world: &mut self.world,
                        bus: &mut self.outbox,
                        now,
                    },
                );
                Ok(())
            }
        }
    }

    /// Spawns the local avatar for `role` and announces it to everyone
    pub fn assign_role(&mut self, role: Role) -> SessionResult<Vec3> {
        if self.avatars.contains_key(&self.local) {
            return Err(SessionError::AlreadyAssigned(self.local));
        }

        let position = choose_spawn_point(
            role,
            &self.anchors,
            &self.world,
            &mut self.rng,
            &self.spawn_config,
        )?;
        let avatar = Avatar::spawn(self.local, self.local, role, position, self.interpolation);
        if let Some(hud) = &avatar.hud {
            info!("{}: {}", hud.name, hud.description);
        }
        self.avatars.insert(self.local, avatar);

        self.outbox
            .send(RpcTarget::AllBuffered, Rpc::AvatarSpawned { position, role });
        Ok(position)
    }

    fn spawn_observed(&mut self, owner: PeerId, role: Role, position: Vec3) {
        if owner == self.local || self.avatars.contains_key(&owner) {
            debug!("Avatar of {} already present", owner);
            return;
        }
        let mut avatar = Avatar::spawn(owner, self.local, role, position, self.interpolation);
        avatar.replicator.snap(&avatar.body, self.clock);
        self.avatars.insert(owner, avatar);
        debug!("Observing {} as {}", owner, role);
    }

    fn remove_avatar(&mut self, peer: PeerId) {
        if let Some(mut avatar) = self.avatars.remove(&peer) {
            avatar.possession.release_all(&mut self.world.items);
            info!("{} left; avatar removed", peer);
        }
    }

    /// Owner side of the network tick: the sample for the local avatar
    pub fn write_samples(&mut self) -> Option<(PeerId, ReplicationSample)> {
        let now = self.clock;
        let avatar = self.avatars.get_mut(&self.local)?;
        avatar
            .replicator
            .serialize(Direction::Write, &mut avatar.body, now)
            .map(|sample| (self.local, sample))
    }

    /// Observer side of the network tick; samples for avatars not seen yet
    /// are dropped
    pub fn apply_sample(&mut self, entity: PeerId, sample: ReplicationSample, now: f64) -> bool {
        let Some(avatar) = self.avatars.get_mut(&entity) else {
            debug!("Sample for unknown avatar {} dropped", entity);
            return false;
        };
        avatar
            .replicator
            .serialize(Direction::Read(sample), &mut avatar.body, now);
        true
    }

    /// Render-rate tick: interpolation and held-item poses
    pub fn frame_tick(&mut self, dt: f32) {
        self.clock += dt as f64;
        let now = self.clock;
        for avatar in self.avatars.values_mut() {
            avatar.replicator.tick(dt, &mut avatar.body);
            avatar.possession.tick(
                dt,
                ItemContext {
                    body: &avatar.body,
                    world: &mut self.world,
                    bus: &mut self.outbox,
                    now,
                },
            );
        }
    }

    /// Fixed-rate tick: moves the local avatar and integrates free items
    pub fn physics_tick(&mut self, dt: f32, intent: &MoveIntent) {
        if let Some(avatar) = self.avatars.get_mut(&self.local) {
            locomotion::step(&mut avatar.body, intent, &self.world, dt, &self.locomotion);
        }
        self.world.step_items(dt);
    }

    fn with_local<T>(
        &mut self,
        op: impl FnOnce(&mut Possession, ItemContext<'_>) -> T,
    ) -> Option<T> {
        let now = self.clock;
        let avatar = self.avatars.get_mut(&self.local)?;
        Some(op(
            &mut avatar.possession,
            ItemContext {
                body: &avatar.body,
                world: &mut self.world,
                bus: &mut self.outbox,
                now,
            },
        ))
    }

    /// Tries to pick up whatever the local avatar looks at, `pitch` radians
    /// below (positive) or above its forward direction
    pub fn pickup(&mut self, pitch: f32) -> bool {
        self.with_local(|possession, ctx| {
            let look = look_ray(ctx.body, pitch);
            possession.pickup(&look, ctx)
        })
        .unwrap_or(false)
    }

    pub fn swap(&mut self) -> bool {
        self.with_local(|possession, ctx| possession.swap(ctx))
            .unwrap_or(false)
    }

    pub fn drop_current(&mut self) -> bool {
        self.with_local(|possession, ctx| possession.drop_current(ctx))
            .unwrap_or(false)
    }

    pub fn charge(&mut self) -> bool {
        self.with_local(|possession, ctx| possession.start_charge(ctx))
            .unwrap_or(false)
    }

    pub fn release_throw(&mut self) -> Option<f32> {
        self.with_local(|possession, ctx| possession.throw(ctx))
            .flatten()
    }

    pub fn swing(&mut self) -> bool {
        self.with_local(|possession, ctx| possession.swing(ctx))
            .unwrap_or(false)
    }

    pub fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.chat.push(self.name.clone(), text.clone(), self.color);
        self.outbox.send(
            RpcTarget::Others,
            Rpc::ChatMessage {
                sender: self.name.clone(),
                text,
                color: self.color,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutgoingCall;
    use crate::physics::Physics;
    use assert_approx_eq::assert_approx_eq;

    const HOST: PeerId = PeerId::SERVER;
    const GUEST: PeerId = PeerId(1);

    /// Anchor at the origin, no perturbation, one item straight ahead at eye level
    fn pinned(local: PeerId) -> PeerSession {
        let world = World::new().with_item(ItemId(1), Vec3::new(0.0, 2.6, 1.0));
        let anchors = SpawnAnchors {
            monster: vec![Vec3::new(0.0, 2.0, 0.0)],
            survivor: vec![Vec3::new(0.0, 2.0, 0.0)],
        };
        PeerSession::with_level(local, Some(1), world, anchors).with_spawn_config(SpawnConfig {
            radius: 0.0,
            ..SpawnConfig::default()
        })
    }

    /// Hands every queued call of `from` to `to`, skipping ones addressed elsewhere
    fn pump(from: &mut PeerSession, to: &mut PeerSession) {
        let sender = from.local_id();
        let calls: Vec<OutgoingCall> = from.outbox().drain().collect();
        for call in calls {
            if let RpcTarget::Peer(peer) = call.target {
                if peer != to.local_id() {
                    continue;
                }
            }
            to.handle_rpc(sender, call.rpc).unwrap();
        }
    }

    #[test]
    fn test_assign_role_spawns_and_announces() {
        let mut session = PeerSession::new(GUEST, Some(3));
        let position = session.assign_role(Role::Priest).unwrap();

        let avatar = session.local_avatar().unwrap();
        assert_eq!(avatar.body.position, position);
        assert!(avatar.replicator.authority().is_local());
        assert_eq!(
            session.role_hud(),
            Some(&RoleHud {
                name: "Priest".to_string(),
                description: "You're a Priest".to_string(),
            })
        );
        assert_eq!(
            session.outbox().last(),
            Some(&OutgoingCall {
                target: RpcTarget::AllBuffered,
                rpc: Rpc::AvatarSpawned {
                    position,
                    role: Role::Priest
                },
            })
        );
    }

    #[test]
    fn test_second_assignment_is_refused() {
        let mut session = PeerSession::new(GUEST, Some(3));
        session.assign_role(Role::Peasant).unwrap();
        assert!(matches!(
            session.assign_role(Role::Monster),
            Err(SessionError::AlreadyAssigned(GUEST))
        ));
    }

    #[test]
    fn test_role_from_non_server_is_ignored() {
        let mut session = PeerSession::new(GUEST, Some(3));
        session
            .handle_rpc(PeerId(2), Rpc::AssignRole { role: Role::Monster })
            .unwrap();
        assert!(session.local_avatar().is_none());

        session
            .handle_rpc(HOST, Rpc::AssignRole { role: Role::Monster })
            .unwrap();
        assert_eq!(session.local_avatar().unwrap().role, Role::Monster);
    }

    #[test]
    fn test_observer_interpolates_owner_samples() {
        let mut host = pinned(HOST);
        let mut guest = pinned(GUEST);
        host.assign_role(Role::Monster).unwrap();
        pump(&mut host, &mut guest);

        let observed = guest.avatar(HOST).unwrap();
        assert!(!observed.replicator.authority().is_local());
        assert!(observed.hud.is_none());

        let walk = MoveIntent {
            forward: 1.0,
            ..Default::default()
        };
        for _ in 0..10 {
            host.physics_tick(0.02, &walk);
        }
        host.frame_tick(0.2);
        let (entity, sample) = host.write_samples().unwrap();
        assert_eq!(entity, HOST);
        assert!(guest.write_samples().is_none());

        assert!(guest.apply_sample(entity, sample, 0.2));
        guest.frame_tick(0.1);
        let halfway = guest.avatar(HOST).unwrap().body.position;
        guest.frame_tick(0.1);
        let arrived = guest.avatar(HOST).unwrap().body.position;

        let expected = sample.position + sample.velocity * 0.2;
        assert_approx_eq!(halfway.z, expected.z * 0.5, 1e-4);
        assert_approx_eq!(arrived.z, expected.z, 1e-4);
    }

    #[test]
    fn test_sample_for_unknown_avatar_is_dropped() {
        let mut guest = pinned(GUEST);
        let sample = ReplicationSample::from_body(&Body::at(Vec3::ONE));
        assert!(!guest.apply_sample(PeerId(9), sample, 0.0));
    }

    #[test]
    fn test_pickup_and_throw_are_mirrored() {
        let mut host = pinned(HOST);
        let mut guest = pinned(GUEST);
        guest.assign_role(Role::Peasant).unwrap();
        pump(&mut guest, &mut host);

        assert!(guest.pickup(0.0));
        pump(&mut guest, &mut host);
        let mirrored = host.world().items.get(ItemId(1)).unwrap();
        assert_eq!(mirrored.equipped_to, Some(GUEST));
        assert_eq!(host.avatar(GUEST).unwrap().possession.current(), Some(ItemId(1)));

        for _ in 0..5 {
            guest.frame_tick(0.05);
        }
        assert!(guest.charge());
        guest.frame_tick(0.5);
        assert!(guest.release_throw().is_some());
        pump(&mut guest, &mut host);

        let thrown = host.world().items.get(ItemId(1)).unwrap();
        assert!(!thrown.equipped);
        assert!(thrown.physics_enabled);
        assert!(host.avatar(GUEST).unwrap().possession.current().is_none());
    }

    /// At most one avatar's slots reference `item`, and the item agrees
    fn assert_single_holder(session: &PeerSession, item: ItemId) {
        let holders: Vec<PeerId> = [HOST, GUEST]
            .into_iter()
            .filter(|peer| {
                session.avatar(*peer).is_some_and(|avatar| {
                    avatar.possession.current() == Some(item)
                        || avatar.possession.sheathed() == Some(item)
                })
            })
            .collect();
        assert!(holders.len() <= 1, "{:?} all hold {:?}", holders, item);

        let mirror = session.world().items.get(item).unwrap();
        match holders.first() {
            Some(holder) => {
                assert!(mirror.equipped);
                assert_eq!(mirror.equipped_to, Some(*holder));
                assert!(!mirror.physics_enabled);
            }
            None => assert!(!mirror.equipped),
        }
    }

    /// Both peers claim item 1 before either hears of the other's claim
    fn contested_pickup() -> (PeerSession, PeerSession) {
        let mut host = pinned(HOST);
        let mut guest = pinned(GUEST);
        host.assign_role(Role::Monster).unwrap();
        guest.assign_role(Role::Peasant).unwrap();
        pump(&mut host, &mut guest);
        pump(&mut guest, &mut host);

        assert!(host.pickup(0.0));
        assert!(guest.pickup(0.0));
        pump(&mut host, &mut guest);
        pump(&mut guest, &mut host);

        assert_eq!(host.world().items.get(ItemId(1)).unwrap().equipped_to, Some(HOST));
        assert_eq!(guest.world().items.get(ItemId(1)).unwrap().equipped_to, Some(GUEST));
        (host, guest)
    }

    #[test]
    fn test_contested_item_survives_loser_drop() {
        let (mut host, mut guest) = contested_pickup();

        assert!(guest.drop_current());
        pump(&mut guest, &mut host);

        assert_eq!(host.local_avatar().unwrap().possession.current(), Some(ItemId(1)));
        assert_single_holder(&host, ItemId(1));
        assert_single_holder(&guest, ItemId(1));
    }

    #[test]
    fn test_contested_item_survives_loser_throw() {
        let (mut host, mut guest) = contested_pickup();

        for _ in 0..5 {
            guest.frame_tick(0.05);
        }
        assert!(guest.charge());
        guest.frame_tick(0.5);
        assert!(guest.release_throw().is_some());
        pump(&mut guest, &mut host);
        host.frame_tick(0.05);

        let mirror = host.world().items.get(ItemId(1)).unwrap();
        assert_eq!(mirror.velocity, Vec3::ZERO);
        assert_eq!(host.local_avatar().unwrap().possession.current(), Some(ItemId(1)));
        assert_single_holder(&host, ItemId(1));
        assert_single_holder(&guest, ItemId(1));
    }

    #[test]
    fn test_remote_call_for_unknown_avatar_is_an_error() {
        let mut host = pinned(HOST);
        assert!(matches!(
            host.handle_rpc(GUEST, Rpc::Swap),
            Err(SessionError::UnknownAvatar(GUEST))
        ));
    }

    #[test]
    fn test_peer_left_releases_held_items() {
        let mut host = pinned(HOST);
        let mut guest = pinned(GUEST);
        guest.assign_role(Role::Assassin).unwrap();
        guest.pickup(0.0);
        pump(&mut guest, &mut host);
        assert!(host.world().items.get(ItemId(1)).unwrap().equipped);

        host.handle_rpc(HOST, Rpc::PeerLeft { peer: GUEST }).unwrap();
        assert!(host.avatar(GUEST).is_none());
        let item = host.world().items.get(ItemId(1)).unwrap();
        assert!(!item.equipped);
        assert_eq!(item.equipped_to, None);
    }

    #[test]
    fn test_chat_reaches_others_and_sender() {
        let mut host = pinned(HOST).with_chat_identity("Host", [1.0, 0.0, 0.0]);
        let mut guest = pinned(GUEST);
        host.say("hello");
        pump(&mut host, &mut guest);

        assert_eq!(host.chat().last().unwrap().text, "hello");
        let received = guest.chat().last().unwrap();
        assert_eq!(received.sender, "Host");
        assert_eq!(received.color, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_actions_without_avatar_are_silent() {
        let mut session = pinned(GUEST);
        assert!(!session.pickup(0.0));
        assert!(!session.swing());
        assert!(session.release_throw().is_none());
        assert!(session.outbox().is_empty());
    }

    #[test]
    fn test_default_arena_spawns_clear_of_obstacles() {
        let mut session = PeerSession::new(PeerId(4), Some(99));
        let position = session.assign_role(Role::Survivor).unwrap();
        assert!(!session.world().check_sphere(position, SpawnConfig::default().check_radius));
    }
}
