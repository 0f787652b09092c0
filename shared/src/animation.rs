//! Wield-attachment animation gate
//!
//! Item operations only care whether the wield attachment is idle. This
//! small state machine stands in for the animation subsystem and exposes
//! exactly that.

pub const SWING_DURATION: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WieldState {
    Default,
    Swinging { remaining: f32 },
    /// Imposed from outside the possession logic, e.g. a stagger
    Interrupted { remaining: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WieldAnimator {
    state: WieldState,
}

impl Default for WieldAnimator {
    fn default() -> Self {
        Self {
            state: WieldState::Default,
        }
    }
}

impl WieldAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WieldState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WieldState::Default
    }

    pub fn start_swing(&mut self) {
        self.state = WieldState::Swinging {
            remaining: SWING_DURATION,
        };
    }

    pub fn interrupt(&mut self, duration: f32) {
        self.state = WieldState::Interrupted {
            remaining: duration,
        };
    }

    pub fn tick(&mut self, dt: f32) {
        self.state = match self.state {
            WieldState::Default => WieldState::Default,
            WieldState::Swinging { remaining } if remaining > dt => WieldState::Swinging {
                remaining: remaining - dt,
            },
            WieldState::Interrupted { remaining } if remaining > dt => {
                WieldState::Interrupted {
                    remaining: remaining - dt,
                }
            }
            _ => WieldState::Default,
        };
    }
}
