//! Key commands understood by the physics engine.
//!
//! The layout is the 3x3 grid of the keyboard manager:
//!
//! ```text
//!  w e r      \ ^ /
//!  s d f      < X >
//!  x c v      / v \
//! ```
//!
//! plus `b` (brake), `u` (reset) and `p` (quit).

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Action triggered by a key press.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KeyCommand {
    /// Add one force step along `direction` (components in {-1, 0, 1}).
    Thrust { direction: Vec2 },
    /// Zero the accumulated force.
    RemoveForces,
    /// Zero the accumulated force and halve the velocity.
    Brake,
    /// Put the drone back at its spawn state.
    Reset,
    /// End the session. Handled by the input relay, never by the engine.
    Quit,
}

impl KeyCommand {
    /// Map a raw key byte. Upper and lower case are equivalent.
    pub fn from_key(key: u8) -> Option<Self> {
        let thrust = |x: f32, y: f32| {
            Some(KeyCommand::Thrust {
                direction: Vec2::new(x, y),
            })
        };
        match key.to_ascii_lowercase() {
            b'w' => thrust(-1.0, -1.0),
            b'e' => thrust(0.0, -1.0),
            b'r' => thrust(1.0, -1.0),
            b's' => thrust(-1.0, 0.0),
            b'f' => thrust(1.0, 0.0),
            b'x' => thrust(-1.0, 1.0),
            b'c' => thrust(0.0, 1.0),
            b'v' => thrust(1.0, 1.0),
            b'd' => Some(KeyCommand::RemoveForces),
            b'b' => Some(KeyCommand::Brake),
            b'u' => Some(KeyCommand::Reset),
            b'p' => Some(KeyCommand::Quit),
            _ => None,
        }
    }
}
