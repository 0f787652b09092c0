//! Minimal in-memory level: a ground plane, static sphere obstacles and the
//! item mirror, answering the [`Physics`] queries the core needs

use crate::item::{Item, ItemId, ItemRegistry, ITEM_RADIUS};
use crate::physics::{ColliderTag, Physics, Ray, RaycastHit};
use crate::GRAVITY;
use glam::{Quat, Vec3};

/// Fraction of horizontal item velocity kept per ground contact step
const GROUND_FRICTION: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub center: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone, Default)]
pub struct World {
    pub ground_height: f32,
    pub obstacles: Vec<Obstacle>,
    pub items: ItemRegistry,
}

/// Nearest intersection distance of `ray` with a sphere, if any
fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.length_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    let near = -b - root;
    if near >= 0.0 {
        return Some(near);
    }
    // Origin inside the sphere
    let far = -b + root;
    (far >= 0.0).then_some(far)
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_obstacle(mut self, center: Vec3, radius: f32) -> Self {
        self.obstacles.push(Obstacle { center, radius });
        self
    }

    pub fn with_item(mut self, id: ItemId, position: Vec3) -> Self {
        self.items.insert(Item::new(id, position));
        self
    }

    /// Integrates every free item: gravity, angular motion and a resting floor
    pub fn step_items(&mut self, dt: f32) {
        let floor = self.ground_height + ITEM_RADIUS;
        for item in self.items.iter_mut().filter(|item| item.physics_enabled) {
            item.velocity.y -= GRAVITY * dt;
            item.position += item.velocity * dt;

            let spin = item.angular_velocity * dt;
            if spin.length_squared() > 0.0 {
                item.rotation = (Quat::from_scaled_axis(spin) * item.rotation).normalize();
            }

            if item.position.y <= floor {
                item.position.y = floor;
                item.velocity.y = 0.0;
                item.velocity.x *= GROUND_FRICTION;
                item.velocity.z *= GROUND_FRICTION;
                item.angular_velocity *= GROUND_FRICTION;
            }
        }
    }
}

impl Physics for World {
    fn raycast_all(&self, ray: &Ray, max_distance: f32) -> Vec<RaycastHit> {
        let mut hits = Vec::new();

        if ray.direction.y < 0.0 {
            let distance = (self.ground_height - ray.origin.y) / ray.direction.y;
            if (0.0..=max_distance).contains(&distance) {
                hits.push(RaycastHit {
                    distance,
                    point: ray.at(distance),
                    tag: ColliderTag::Ground,
                    is_trigger: false,
                });
            }
        }

        for obstacle in &self.obstacles {
            if let Some(distance) = ray_sphere(ray, obstacle.center, obstacle.radius) {
                if distance <= max_distance {
                    hits.push(RaycastHit {
                        distance,
                        point: ray.at(distance),
                        tag: ColliderTag::Obstacle,
                        is_trigger: false,
                    });
                }
            }
        }

        for item in self.items.iter().filter(|item| item.physics_enabled) {
            if let Some(distance) = ray_sphere(ray, item.position, ITEM_RADIUS) {
                if distance <= max_distance {
                    hits.push(RaycastHit {
                        distance,
                        point: ray.at(distance),
                        tag: ColliderTag::Item(item.id),
                        is_trigger: false,
                    });
                }
            }
        }

        hits
    }

    fn check_sphere(&self, point: Vec3, radius: f32) -> bool {
        if point.y - radius < self.ground_height {
            return true;
        }
        let overlaps = |center: Vec3, other: f32| point.distance(center) < radius + other;
        self.obstacles
            .iter()
            .any(|obstacle| overlaps(obstacle.center, obstacle.radius))
            || self
                .items
                .iter()
                .filter(|item| item.physics_enabled)
                .any(|item| overlaps(item.position, ITEM_RADIUS))
    }
}
