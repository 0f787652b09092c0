//! Owner-side avatar movement, run at the fixed physics tick

use crate::physics::{sort_hits_by_distance, Physics, Ray};
use crate::replication::Body;
use crate::{CAPSULE_HEIGHT, GRAVITY};
use glam::{Quat, Vec2, Vec3};

/// Desired movement for one physics tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    /// -1.0 (back) to 1.0 (ahead)
    pub forward: f32,
    /// -1.0 (left) to 1.0 (right)
    pub strafe: f32,
    /// Yaw rate in radians per second
    pub turn: f32,
    pub jump: bool,
    pub sprint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocomotionConfig {
    pub run_speed: f32,
    pub walk_speed: f32,
    pub strafe_speed: f32,
    pub jump_power: f32,
    /// Ground ray length as a fraction of the capsule height
    pub jump_ray_length: f32,
    /// Speed at which a grounded body is pulled onto the surface below it
    pub ground_sticky: f32,
    pub capsule_height: f32,
}

impl Default for LocomotionConfig {
    fn default() -> Self {
        Self {
            run_speed: 8.0,
            walk_speed: 3.0,
            strafe_speed: 4.0,
            jump_power: 5.0,
            jump_ray_length: 0.7,
            ground_sticky: 5.0,
            capsule_height: CAPSULE_HEIGHT,
        }
    }
}

fn move_towards(current: Vec3, target: Vec3, max_delta: f32) -> Vec3 {
    let delta = target - current;
    let distance = delta.length();
    if distance <= max_delta || distance == 0.0 {
        target
    } else {
        current + delta / distance * max_delta
    }
}

/// Advances `body` by one tick of `intent`
///
/// Walks by default and runs while sprinting. Vertical velocity is kept
/// across ticks so gravity accumulates while airborne.
pub fn step<P: Physics + ?Sized>(
    body: &mut Body,
    intent: &MoveIntent,
    physics: &P,
    dt: f32,
    config: &LocomotionConfig,
) {
    body.angular_velocity = Vec3::new(0.0, intent.turn, 0.0);
    if intent.turn != 0.0 {
        body.rotation = (body.rotation * Quat::from_rotation_y(intent.turn * dt)).normalize();
    }

    let speed = if intent.sprint {
        config.run_speed
    } else {
        config.walk_speed
    };

    let mut input = Vec2::new(intent.strafe, intent.forward);
    if input.length_squared() > 1.0 {
        input = input.normalize();
    }

    let desired = body.forward() * input.y * speed + body.right() * input.x * config.strafe_speed;
    let mut vertical = body.velocity.y;
    if body.grounded && intent.jump {
        vertical += config.jump_power;
        body.grounded = false;
    }
    body.velocity = Vec3::new(desired.x, vertical, desired.z);

    if body.grounded || body.velocity.y < config.jump_power * 0.5 {
        ground_check(body, physics, dt, config);
    }

    if !body.grounded {
        body.velocity.y -= GRAVITY * dt;
    }
    body.position += body.velocity * dt;
}

fn ground_check<P: Physics + ?Sized>(
    body: &mut Body,
    physics: &P,
    dt: f32,
    config: &LocomotionConfig,
) {
    let ray = Ray::new(body.position, Vec3::NEG_Y);
    let mut hits = physics.raycast_all(&ray, config.capsule_height * config.jump_ray_length);
    sort_hits_by_distance(&mut hits);

    body.grounded = false;
    if let Some(hit) = hits.iter().find(|hit| !hit.is_trigger) {
        body.grounded = true;
        let rest = hit.point + Vec3::Y * config.capsule_height * 0.5;
        body.position = move_towards(body.position, rest, dt * config.ground_sticky);
        body.velocity.y = 0.0;
    }
}
