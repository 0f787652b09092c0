//! Physics-enabled items that avatars can hold

use crate::peer::PeerId;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ITEM_RADIUS: f32 = 0.2;
pub const ITEM_MASS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub equipped: bool,
    pub equipped_to: Option<PeerId>,
    /// Collision and rigid body simulation; both are off while held
    pub physics_enabled: bool,
    /// Pose relative to the holder's attachment point
    pub local_position: Vec3,
    pub local_rotation: Quat,
}

impl Item {
    pub fn new(id: ItemId, position: Vec3) -> Self {
        Self {
            id,
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            equipped: false,
            equipped_to: None,
            physics_enabled: true,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
        }
    }

    /// Parents the item to `holder`'s attachment point at `anchor`
    ///
    /// The current world pose is kept as a local offset so the holder can
    /// blend it to identity.
    pub fn claim(&mut self, holder: PeerId, anchor: Vec3, anchor_rotation: Quat) {
        let inverse = anchor_rotation.inverse();
        self.local_position = inverse * (self.position - anchor);
        self.local_rotation = inverse * self.rotation;
        self.equipped = true;
        self.equipped_to = Some(holder);
        self.physics_enabled = false;
        self.velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
    }

    /// Detaches the item at its current world pose and hands it back to physics
    pub fn release(&mut self) {
        self.equipped = false;
        self.equipped_to = None;
        self.physics_enabled = true;
        self.local_position = Vec3::ZERO;
        self.local_rotation = Quat::IDENTITY;
    }

    pub fn apply_impulse(&mut self, impulse: Vec3, torque: Vec3) {
        self.velocity += impulse / ITEM_MASS;
        self.angular_velocity += torque / ITEM_MASS;
    }

    /// Moves a held item along with its attachment point
    pub fn follow_anchor(&mut self, anchor: Vec3, anchor_rotation: Quat) {
        self.position = anchor + anchor_rotation * self.local_position;
        self.rotation = anchor_rotation * self.local_rotation;
    }
}

/// One peer's local mirror of every item in the level
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    items: BTreeMap<ItemId, Item>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: Item) {
        self.items.insert(item.id, item);
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        self.items.values_mut()
    }

    /// Items whose `equipped_to` names `holder`
    pub fn held_by(&self, holder: PeerId) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|item| item.equipped_to == Some(holder))
            .map(|item| item.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
