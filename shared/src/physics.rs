//! Physics queries consumed by the core

use crate::item::ItemId;
use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

/// What a collider belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColliderTag {
    Ground,
    Obstacle,
    Item(ItemId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub distance: f32,
    pub point: Vec3,
    pub tag: ColliderTag,
    pub is_trigger: bool,
}

pub trait Physics {
    /// Every collider crossed by `ray` within `max_distance`, in no particular order
    fn raycast_all(&self, ray: &Ray, max_distance: f32) -> Vec<RaycastHit>;

    /// True when any collider overlaps the sphere
    fn check_sphere(&self, point: Vec3, radius: f32) -> bool;
}

/// Sorts hits nearest first
pub fn sort_hits_by_distance(hits: &mut [RaycastHit]) {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}
