//! Owner-to-observer transform replication
//!
//! The owning peer writes one [`ReplicationSample`] per network tick from
//! its simulated [`Body`]. Observers never integrate physics for bodies they
//! do not own: each received sample restarts a blend from the currently
//! rendered pose toward a pose extrapolated one sample interval ahead, and
//! the frame tick advances that blend.

use crate::peer::Authority;
use glam::{EulerRot, Quat, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

/// Lower bound for the measured interval between two samples, in seconds
pub const SYNC_DELAY_EPSILON: f32 = 1e-3;

/// Physical state of an avatar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Derived locally by the owner each physics tick; never replicated
    pub grounded: bool,
}

impl Body {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            grounded: true,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

/// One snapshot of an owner's body as sent over the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSample {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub angular_velocity: Vec3,
}

impl ReplicationSample {
    pub fn from_body(body: &Body) -> Self {
        Self {
            position: body.position,
            velocity: body.velocity,
            rotation: body.rotation,
            angular_velocity: body.angular_velocity,
        }
    }
}

/// Direction flag of a serialize callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    Write,
    Read(ReplicationSample),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationConfig {
    /// Keep the blend factor within [0, 1]. When false the observer keeps
    /// extrapolating past the end pose until the next sample lands.
    pub clamp: bool,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self { clamp: true }
    }
}

/// Per observed body, per observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationState {
    pub sync_delay: f32,
    pub sync_time: f32,
    pub last_sync_at: f64,
    pub start_position: Vec3,
    pub end_position: Vec3,
    pub start_rotation: Quat,
    pub end_rotation: Quat,
}

impl InterpolationState {
    fn at_rest(body: &Body, now: f64) -> Self {
        Self {
            sync_delay: SYNC_DELAY_EPSILON,
            sync_time: 0.0,
            last_sync_at: now,
            start_position: body.position,
            end_position: body.position,
            start_rotation: body.rotation,
            end_rotation: body.rotation,
        }
    }
}

/// Rotation covered by `angular_velocity` (radians per second) in `seconds`,
/// applied about Z, then X, then Y
fn angular_step(angular_velocity: Vec3, seconds: f32) -> Quat {
    let step = angular_velocity * seconds;
    Quat::from_euler(EulerRot::YXZ, step.y, step.x, step.z)
}

/// Replication endpoint attached to one networked body
#[derive(Debug, Clone)]
pub struct Replicator {
    authority: Authority,
    config: InterpolationConfig,
    state: Option<InterpolationState>,
}

impl Replicator {
    pub fn new(authority: Authority, config: InterpolationConfig) -> Self {
        Self {
            authority,
            config,
            state: None,
        }
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn interpolation(&self) -> Option<&InterpolationState> {
        self.state.as_ref()
    }

    /// Serialize callback, invoked once per network tick
    ///
    /// On the owner, `Write` yields the sample to send. On an observer,
    /// `Read` consumes a sample received at `now` (seconds on the local
    /// session clock). Any other combination is ignored.
    pub fn serialize(
        &mut self,
        direction: Direction,
        body: &mut Body,
        now: f64,
    ) -> Option<ReplicationSample> {
        match (direction, self.authority.is_local()) {
            (Direction::Write, true) => Some(ReplicationSample::from_body(body)),
            (Direction::Read(sample), false) => {
                self.receive(sample, body, now);
                None
            }
            (Direction::Write, false) => None,
            (Direction::Read(_), true) => {
                debug!("Ignoring sample for a locally owned body");
                None
            }
        }
    }

    fn receive(&mut self, sample: ReplicationSample, body: &Body, now: f64) {
        let last_sync_at = self.state.map(|s| s.last_sync_at).unwrap_or(0.0);
        let sync_delay = ((now - last_sync_at) as f32).max(SYNC_DELAY_EPSILON);

        self.state = Some(InterpolationState {
            sync_delay,
            sync_time: 0.0,
            last_sync_at: now,
            start_position: body.position,
            end_position: sample.position + sample.velocity * sync_delay,
            start_rotation: body.rotation,
            end_rotation: sample.rotation * angular_step(sample.angular_velocity, sync_delay),
        });
    }

    /// Frame tick: advances the blend and writes the rendered pose into `body`
    pub fn tick(&mut self, dt: f32, body: &mut Body) {
        if self.authority.is_local() {
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };

        state.sync_time += dt;
        let mut t = state.sync_time / state.sync_delay;
        if self.config.clamp {
            t = t.clamp(0.0, 1.0);
        }

        body.position = state.start_position.lerp(state.end_position, t);
        body.rotation = state.start_rotation.slerp(state.end_rotation, t);
    }

    /// Places an observed body without blending, used when it first appears
    pub fn snap(&mut self, body: &Body, now: f64) {
        if !self.authority.is_local() {
            self.state = Some(InterpolationState::at_rest(body, now));
        }
    }
}
