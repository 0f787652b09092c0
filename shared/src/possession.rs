//! Held-item state machine of one avatar
//!
//! An avatar has a wielded slot (`current`) and a stowed slot (`sheathed`).
//! The owning peer runs the operations below against its own view of the
//! level; each successful transition is mirrored to every other peer with a
//! single [`Rpc`] carrying the minimum payload. Receivers replay the
//! transition from their local mirror through [`Possession::apply_remote`]
//! and never re-broadcast. Unmet preconditions are silent no-ops.
//!
//! There is no resync: a receiver that missed an earlier call keeps its own
//! idea of the slots until a later call overwrites it.

use crate::animation::WieldAnimator;
use crate::bus::{MessageBus, Rpc, RpcTarget};
use crate::item::{ItemId, ItemRegistry};
use crate::peer::{Authority, PeerId};
use crate::physics::{sort_hits_by_distance, ColliderTag, Physics, Ray};
use crate::replication::Body;
use crate::world::World;
use crate::CAPSULE_HEIGHT;
use glam::{Quat, Vec3};
use log::{debug, warn};

/// Reach of a pickup, as a multiple of the capsule height
pub const PLAYER_REACH: f32 = 1.0;
pub const GOAL_CHARGE_SECS: f32 = 1.0;
pub const MIN_THROW_PERCENT: f32 = 0.15;
pub const THROW_FORCE: f32 = 12.0;
/// Local-space torque applied to every thrown item
pub const THROW_TORQUE: Vec3 = Vec3::new(0.0, 0.0, -4.0);
pub const EQUIP_BLEND_SECS: f32 = 0.2;
/// Offset of a fully charged item from its rest pose, attachment space
pub const CHARGE_PULLBACK: Vec3 = Vec3::new(0.0, 0.15, -0.45);
/// How fast a cancelled charge eases back to rest, per second
const CHARGE_RETURN_RATE: f32 = 8.0;

/// Wield attachment point, body space
pub const WEAPON_OFFSET: Vec3 = Vec3::new(0.35, 0.3, 0.5);
/// Stowed attachment point, body space
pub const SHEATH_OFFSET: Vec3 = Vec3::new(-0.25, 0.1, -0.3);
/// Eye height above the body origin, where the look ray starts
pub const EYE_OFFSET: Vec3 = Vec3::new(0.0, 0.6, 0.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeState {
    pub started_at: f64,
    pub percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Holding,
    Charging,
}

/// Local pose of a freshly wielded item easing to identity
#[derive(Debug, Clone, Copy, PartialEq)]
struct EquipBlend {
    elapsed: f32,
    from_position: Vec3,
    from_rotation: Quat,
}

/// Everything an item operation touches besides the avatar's own slots
pub struct ItemContext<'a> {
    /// The holder's body, as rendered on this peer
    pub body: &'a Body,
    pub world: &'a mut World,
    pub bus: &'a mut dyn MessageBus,
    /// Session clock, seconds
    pub now: f64,
}

/// Ray from the eye of `body` along its forward direction pitched by `pitch` radians
pub fn look_ray(body: &Body, pitch: f32) -> Ray {
    let direction = body.rotation * Quat::from_rotation_x(pitch) * Vec3::Z;
    Ray::new(body.position + EYE_OFFSET, direction)
}

fn weapon_anchor(body: &Body) -> (Vec3, Quat) {
    (body.position + body.rotation * WEAPON_OFFSET, body.rotation)
}

fn sheath_anchor(body: &Body) -> (Vec3, Quat) {
    (body.position + body.rotation * SHEATH_OFFSET, body.rotation)
}

#[derive(Debug, Clone)]
pub struct Possession {
    holder: PeerId,
    authority: Authority,
    current: Option<ItemId>,
    sheathed: Option<ItemId>,
    charge: Option<ChargeState>,
    animator: WieldAnimator,
    equip_blend: Option<EquipBlend>,
    charge_offset: Vec3,
}

impl Possession {
    pub fn new(holder: PeerId, authority: Authority) -> Self {
        Self {
            holder,
            authority,
            current: None,
            sheathed: None,
            charge: None,
            animator: WieldAnimator::new(),
            equip_blend: None,
            charge_offset: Vec3::ZERO,
        }
    }

    pub fn holder(&self) -> PeerId {
        self.holder
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current
    }

    pub fn sheathed(&self) -> Option<ItemId> {
        self.sheathed
    }

    pub fn charge(&self) -> Option<&ChargeState> {
        self.charge.as_ref()
    }

    pub fn animator(&self) -> &WieldAnimator {
        &self.animator
    }

    pub fn animator_mut(&mut self) -> &mut WieldAnimator {
        &mut self.animator
    }

    pub fn phase(&self) -> Phase {
        match (self.current, self.charge) {
            (None, _) => Phase::Empty,
            (Some(_), None) => Phase::Holding,
            (Some(_), Some(_)) => Phase::Charging,
        }
    }

    /// The wielded item sits at its rest pose: no charge offset, no equip blend
    pub fn is_at_rest(&self) -> bool {
        self.charge.is_none() && self.charge_offset == Vec3::ZERO && self.equip_blend.is_none()
    }

    fn owns(&self, operation: &str) -> bool {
        if !self.authority.is_local() {
            debug!(
                "{} on observed avatar {} rejected",
                operation, self.holder
            );
            return false;
        }
        true
    }

    /// Claims the nearest unequipped item along `look` within reach
    pub fn pickup(&mut self, look: &Ray, ctx: ItemContext<'_>) -> bool {
        if !self.owns("Pickup") || (self.current.is_some() && self.sheathed.is_some()) {
            return false;
        }

        let mut hits = ctx.world.raycast_all(look, CAPSULE_HEIGHT * PLAYER_REACH);
        sort_hits_by_distance(&mut hits);
        let target = hits.iter().find_map(|hit| match hit.tag {
            ColliderTag::Item(id) => ctx
                .world
                .items
                .get(id)
                .filter(|item| !item.equipped)
                .map(|item| item.id),
            _ => None,
        });
        let Some(id) = target else {
            return false;
        };

        self.claim(id, ctx.body, &mut ctx.world.items);
        ctx.bus.send(RpcTarget::Others, Rpc::Pickup { item: id });
        true
    }

    pub fn swap(&mut self, ctx: ItemContext<'_>) -> bool {
        if !self.owns("Swap")
            || self.sheathed.is_none()
            || !self.animator.is_idle()
            || self.charge.is_some()
        {
            return false;
        }
        self.exchange_slots(ctx.body, &mut ctx.world.items);
        ctx.bus.send(RpcTarget::Others, Rpc::Swap);
        true
    }

    pub fn drop_current(&mut self, ctx: ItemContext<'_>) -> bool {
        if !self.owns("Drop") {
            return false;
        }
        let Some(id) = self.release_current(&mut ctx.world.items) else {
            return false;
        };
        self.promote_sheathed(ctx.body, &mut ctx.world.items);
        ctx.bus.send(RpcTarget::Others, Rpc::Drop { item: id });
        true
    }

    pub fn start_charge(&mut self, ctx: ItemContext<'_>) -> bool {
        if !self.owns("Charge")
            || self.current.is_none()
            || self.charge.is_some()
            || !self.animator.is_idle()
        {
            return false;
        }
        self.charge = Some(ChargeState {
            started_at: ctx.now,
            percent: 0.0,
        });
        ctx.bus.send(RpcTarget::Others, Rpc::ChargeStarted);
        true
    }

    /// Releases a charge as a throw
    ///
    /// Returns the percentage that was applied and broadcast, floored at
    /// [`MIN_THROW_PERCENT`] and never capped above.
    pub fn throw(&mut self, ctx: ItemContext<'_>) -> Option<f32> {
        if !self.owns("Throw") || !self.animator.is_idle() {
            return None;
        }
        let charge = self.charge?;
        let percent = charge.percent.max(MIN_THROW_PERCENT);
        let id = self.launch_current(percent, ctx.body, &mut ctx.world.items)?;
        ctx.bus.send(RpcTarget::Others, Rpc::Throw { item: id, percent });
        Some(percent)
    }

    pub fn swing(&mut self, ctx: ItemContext<'_>) -> bool {
        if !self.owns("Swing")
            || self.current.is_none()
            || !self.animator.is_idle()
            || !self.is_at_rest()
        {
            return false;
        }
        self.animator.start_swing();
        ctx.bus.send(RpcTarget::Others, Rpc::Swing);
        true
    }

    /// Frame tick for owners and observers alike
    ///
    /// Advances the animator, cancels a charge whose gate closed, updates the
    /// charge percentage (auto-throwing on the owner at full charge) and
    /// moves held items along with the body.
    pub fn tick(&mut self, dt: f32, ctx: ItemContext<'_>) {
        self.animator.tick(dt);

        if self.charge.is_some() && !self.animator.is_idle() {
            debug!("Charge of {} cancelled by animation", self.holder);
            self.charge = None;
        }

        let mut full_charge = false;
        if let Some(charge) = self.charge.as_mut() {
            charge.percent = ((ctx.now - charge.started_at) as f32 / GOAL_CHARGE_SECS).max(0.0);
            self.charge_offset = CHARGE_PULLBACK * charge.percent.min(1.0);
            full_charge = charge.percent >= 1.0;
        } else if self.charge_offset != Vec3::ZERO {
            let step = (dt * CHARGE_RETURN_RATE).min(1.0);
            self.charge_offset = self.charge_offset.lerp(Vec3::ZERO, step);
            if self.charge_offset.length_squared() < 1e-6 {
                self.charge_offset = Vec3::ZERO;
            }
        }

        if let Some(blend) = self.equip_blend.as_mut() {
            blend.elapsed += dt;
        }
        self.follow_body(ctx.body, &mut ctx.world.items);

        if full_charge && self.authority.is_local() {
            self.throw(ctx);
        }
    }

    /// Mirrors a transition another peer performed on this avatar
    pub fn apply_remote(&mut self, rpc: &Rpc, ctx: ItemContext<'_>) {
        if self.authority.is_local() {
            warn!(
                "Dropping remote {} for locally owned avatar {}",
                rpc.name(),
                self.holder
            );
            return;
        }
        let items = &mut ctx.world.items;

        match rpc {
            Rpc::Pickup { item } => {
                let Some(mirror) = items.get(*item) else {
                    warn!("{} picked up unknown item {:?}", self.holder, item);
                    return;
                };
                if mirror.equipped && mirror.equipped_to != Some(self.holder) {
                    warn!(
                        "{} claims {:?} already held by {:?} here; keeping local claim",
                        self.holder, item, mirror.equipped_to
                    );
                    return;
                }
                if self.current == Some(*item) || self.sheathed == Some(*item) {
                    return;
                }
                if self.current.is_some() && self.sheathed.is_some() {
                    warn!("{} has no free slot for {:?} here", self.holder, item);
                    return;
                }
                self.claim(*item, ctx.body, items);
            }
            Rpc::Drop { item } => {
                if self.forget_if_held_elsewhere(*item, ctx.body, items, "dropped") {
                    return;
                }
                if self.current == Some(*item) {
                    self.release_current(items);
                    self.promote_sheathed(ctx.body, items);
                } else {
                    if self.sheathed == Some(*item) {
                        self.sheathed = None;
                    }
                    if let Some(mirror) = items.get_mut(*item) {
                        mirror.release();
                    }
                }
            }
            Rpc::Swap => {
                if self.sheathed.is_some() {
                    self.exchange_slots(ctx.body, items);
                }
            }
            Rpc::ChargeStarted => {
                if self.current.is_some() {
                    self.charge = Some(ChargeState {
                        started_at: ctx.now,
                        percent: 0.0,
                    });
                }
            }
            Rpc::Throw { item, percent } => {
                if self.forget_if_held_elsewhere(*item, ctx.body, items, "threw") {
                    return;
                }
                if self.current != Some(*item) {
                    // Our mirror diverged; take the thrower's word for the item
                    if self.sheathed == Some(*item) {
                        self.sheathed = None;
                    }
                    self.current = Some(*item);
                }
                self.launch_current(*percent, ctx.body, items);
            }
            Rpc::Swing => self.animator.start_swing(),
            other => debug!("{} is not a possession call", other.name()),
        }
    }

    /// Frees every item this avatar holds in place, for a departing peer
    pub fn release_all(&mut self, items: &mut ItemRegistry) {
        self.charge = None;
        self.charge_offset = Vec3::ZERO;
        self.equip_blend = None;
        for id in [self.current.take(), self.sheathed.take()].into_iter().flatten() {
            if let Some(item) = items.get_mut(id) {
                item.release();
            }
        }
        for id in items.held_by(self.holder) {
            if let Some(item) = items.get_mut(id) {
                item.release();
            }
        }
    }

    /// Clears this avatar's slot mirror of `id` when the local mirror has the
    /// item equipped to another avatar; the item itself is left alone
    fn forget_if_held_elsewhere(
        &mut self,
        id: ItemId,
        body: &Body,
        items: &mut ItemRegistry,
        verb: &str,
    ) -> bool {
        let holder = match items.get(id) {
            Some(item) if item.equipped => item.equipped_to,
            _ => None,
        };
        let Some(other) = holder.filter(|other| *other != self.holder) else {
            return false;
        };

        warn!(
            "{} {} {:?} held by {} here; keeping local claim",
            self.holder, verb, id, other
        );
        if self.sheathed == Some(id) {
            self.sheathed = None;
        }
        if self.current == Some(id) {
            self.current = None;
            self.charge = None;
            self.charge_offset = Vec3::ZERO;
            self.equip_blend = None;
            self.promote_sheathed(body, items);
        }
        true
    }

    fn claim(&mut self, id: ItemId, body: &Body, items: &mut ItemRegistry) {
        let Some(item) = items.get_mut(id) else {
            return;
        };
        if self.current.is_none() {
            let (anchor, rotation) = weapon_anchor(body);
            item.claim(self.holder, anchor, rotation);
            self.equip_blend = Some(EquipBlend {
                elapsed: 0.0,
                from_position: item.local_position,
                from_rotation: item.local_rotation,
            });
            self.current = Some(id);
        } else {
            let (anchor, rotation) = sheath_anchor(body);
            item.claim(self.holder, anchor, rotation);
            item.local_position = Vec3::ZERO;
            item.local_rotation = Quat::IDENTITY;
            self.sheathed = Some(id);
        }
        debug!("{} claimed {:?}", self.holder, id);
    }

    fn exchange_slots(&mut self, body: &Body, items: &mut ItemRegistry) {
        let stowed = self.current.take();
        let drawn = self.sheathed.take();
        self.equip_blend = None;
        if let Some(id) = drawn {
            self.claim(id, body, items);
        }
        if let Some(id) = stowed {
            self.claim(id, body, items);
        }
    }

    fn release_current(&mut self, items: &mut ItemRegistry) -> Option<ItemId> {
        let id = self.current.take()?;
        self.charge = None;
        self.charge_offset = Vec3::ZERO;
        self.equip_blend = None;
        if let Some(item) = items.get_mut(id) {
            item.release();
        }
        Some(id)
    }

    fn promote_sheathed(&mut self, body: &Body, items: &mut ItemRegistry) {
        if let Some(id) = self.sheathed.take() {
            self.claim(id, body, items);
        }
    }

    fn launch_current(
        &mut self,
        percent: f32,
        body: &Body,
        items: &mut ItemRegistry,
    ) -> Option<ItemId> {
        let id = self.release_current(items)?;
        if let Some(item) = items.get_mut(id) {
            item.apply_impulse(
                body.forward() * THROW_FORCE * percent,
                body.rotation * THROW_TORQUE,
            );
        }
        self.promote_sheathed(body, items);
        debug!("{} threw {:?} at {:.2}", self.holder, id, percent);
        Some(id)
    }

    fn follow_body(&mut self, body: &Body, items: &mut ItemRegistry) {
        if let Some(id) = self.current {
            let blend_done = match self.equip_blend {
                Some(blend) => {
                    let t = (blend.elapsed / EQUIP_BLEND_SECS).min(1.0);
                    if let Some(item) = items.get_mut(id) {
                        item.local_position = blend.from_position.lerp(Vec3::ZERO, t);
                        item.local_rotation = blend.from_rotation.slerp(Quat::IDENTITY, t);
                    }
                    t >= 1.0
                }
                None => false,
            };
            if blend_done {
                self.equip_blend = None;
            }

            let (anchor, rotation) = weapon_anchor(body);
            if let Some(item) = items.get_mut(id) {
                item.follow_anchor(anchor + rotation * self.charge_offset, rotation);
            }
        }
        if let Some(id) = self.sheathed {
            let (anchor, rotation) = sheath_anchor(body);
            if let Some(item) = items.get_mut(id) {
                item.follow_anchor(anchor, rotation);
            }
        }
    }
}
