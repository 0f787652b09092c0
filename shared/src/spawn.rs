//! Role-aware spawn placement with bounded obstruction retries

use crate::physics::Physics;
use crate::roles::Role;
use glam::Vec3;
use log::{debug, warn};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpawnError {
    #[error("no spawn anchors tagged for {0}")]
    NoAnchors(Role),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnConfig {
    /// Half-width of the horizontal square a candidate is drawn from
    pub radius: f32,
    /// Radius of the occupancy probe at each candidate
    pub check_radius: f32,
    /// Candidates examined before settling for the last one
    pub max_attempts: usize,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            radius: 5.0,
            check_radius: 1.5,
            max_attempts: 50,
        }
    }
}

/// Tagged spawn anchors of a level
///
/// Monsters draw from their own set; every other role shares the other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnAnchors {
    pub monster: Vec<Vec3>,
    pub survivor: Vec<Vec3>,
}

impl SpawnAnchors {
    pub fn for_role(&self, role: Role) -> &[Vec3] {
        if role.is_monster() {
            &self.monster
        } else {
            &self.survivor
        }
    }
}

fn perturb<R: Rng + ?Sized>(anchor: Vec3, radius: f32, rng: &mut R) -> Vec3 {
    if radius <= 0.0 {
        return anchor;
    }
    Vec3::new(
        anchor.x + rng.gen_range(-radius..radius),
        anchor.y,
        anchor.z + rng.gen_range(-radius..radius),
    )
}

/// Picks where an avatar of `role` enters the level
///
/// One anchor is chosen uniformly, then up to `max_attempts` horizontally
/// perturbed candidates are probed; the first unobstructed one wins. When
/// all of them are obstructed the last candidate is used anyway.
pub fn choose_spawn_point<P, R>(
    role: Role,
    anchors: &SpawnAnchors,
    physics: &P,
    rng: &mut R,
    config: &SpawnConfig,
) -> Result<Vec3, SpawnError>
where
    P: Physics + ?Sized,
    R: Rng + ?Sized,
{
    let candidates = anchors.for_role(role);
    if candidates.is_empty() {
        return Err(SpawnError::NoAnchors(role));
    }
    let anchor = candidates[rng.gen_range(0..candidates.len())];

    let mut candidate = perturb(anchor, config.radius, rng);
    for attempt in 1..=config.max_attempts {
        if !physics.check_sphere(candidate, config.check_radius) {
            debug!("Spawn point for {} found after {} attempt(s)", role, attempt);
            return Ok(candidate);
        }
        if attempt < config.max_attempts {
            candidate = perturb(anchor, config.radius, rng);
        }
    }

    warn!(
        "No clear spawn point for {} after {} attempts; using last candidate",
        role, config.max_attempts
    );
    Ok(candidate)
}
