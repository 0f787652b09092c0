//! Scripted stand-in for a player at the keyboard
//!
//! Turns a seeded RNG into wandering movement and the occasional item
//! action, chosen so that each action is at least plausible for what the
//! avatar currently holds. The session still enforces every precondition.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::locomotion::MoveIntent;
use shared::possession::Phase;
use shared::PeerSession;

/// Physics ticks a wander direction is kept before a new one is drawn
const WANDER_TICKS: u32 = 90;

const CHAT_LINES: [&str; 4] = [
    "Did anyone hear that?",
    "Stay together.",
    "I found something.",
    "Over here!",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Look `pitch` radians below forward and grab what is there
    Pickup { pitch: f32 },
    Swap,
    Drop,
    Charge,
    Throw,
    Swing,
    Say(String),
}

impl Action {
    /// Runs the action on the local avatar; false if it was a no-op
    pub fn perform(self, session: &mut PeerSession) -> bool {
        match self {
            Action::Pickup { pitch } => session.pickup(pitch),
            Action::Swap => session.swap(),
            Action::Drop => session.drop_current(),
            Action::Charge => session.charge(),
            Action::Throw => session.release_throw().is_some(),
            Action::Swing => session.swing(),
            Action::Say(text) => {
                session.say(text);
                true
            }
        }
    }
}

pub struct Driver {
    rng: StdRng,
    intent: MoveIntent,
    ticks_left: u32,
}

impl Driver {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            intent: MoveIntent::default(),
            ticks_left: 0,
        }
    }

    pub fn next_intent(&mut self) -> MoveIntent {
        if self.ticks_left == 0 {
            self.ticks_left = WANDER_TICKS;
            self.intent = MoveIntent {
                forward: self.rng.gen_range(-0.2..1.0),
                strafe: self.rng.gen_range(-0.5..0.5),
                turn: self.rng.gen_range(-1.0..1.0),
                jump: false,
                sprint: self.rng.gen_bool(0.2),
            };
        }
        self.ticks_left -= 1;

        MoveIntent {
            jump: self.rng.gen_bool(0.01),
            ..self.intent
        }
    }

    pub fn next_action(&mut self, phase: Phase) -> Option<Action> {
        if self.rng.gen_bool(0.002) {
            let line = CHAT_LINES[self.rng.gen_range(0..CHAT_LINES.len())];
            return Some(Action::Say(line.to_string()));
        }

        let roll: f64 = self.rng.gen();
        match phase {
            Phase::Empty if roll < 0.05 => Some(Action::Pickup {
                pitch: self.rng.gen_range(0.3..0.9),
            }),
            Phase::Holding if roll < 0.02 => Some(Action::Charge),
            Phase::Holding if roll < 0.04 => Some(Action::Swing),
            Phase::Holding if roll < 0.05 => Some(Action::Swap),
            Phase::Holding if roll < 0.055 => Some(Action::Drop),
            Phase::Holding if roll < 0.07 => Some(Action::Pickup {
                pitch: self.rng.gen_range(0.3..0.9),
            }),
            Phase::Charging if roll < 0.03 => Some(Action::Throw),
            _ => None,
        }
    }
}
