//! Boundary clamp. Walls are inelastic: the axis that hit a wall loses its
//! velocity and its accumulated force.

use dronesim_core::types::{DroneState, GameBounds};

/// Axes clamped during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clamped {
    pub x: bool,
    pub y: bool,
}

impl Clamped {
    pub fn any(self) -> bool {
        self.x || self.y
    }
}

/// Keep the drone inside `[0, width) x [0, height)`. A drone past the far
/// edge is put back at `extent - margin`, and never on the edge itself.
pub fn run(drone: &mut DroneState, bounds: GameBounds, margin: f32) -> Clamped {
    let x = clamp_axis(
        &mut drone.position.x,
        &mut drone.velocity.x,
        &mut drone.force.x,
        bounds.width() as f32,
        margin,
    );
    let y = clamp_axis(
        &mut drone.position.y,
        &mut drone.velocity.y,
        &mut drone.force.y,
        bounds.height() as f32,
        margin,
    );
    Clamped { x, y }
}

fn clamp_axis(
    position: &mut f32,
    velocity: &mut f32,
    force: &mut f32,
    extent: f32,
    margin: f32,
) -> bool {
    let clamped_to = if *position < 0.0 {
        0.0
    } else if *position >= extent {
        (extent - margin).min(below(extent)).max(0.0)
    } else {
        return false;
    };
    *position = clamped_to;
    *velocity = 0.0;
    *force = 0.0;
    true
}

/// Largest value strictly below a positive `extent`.
fn below(extent: f32) -> f32 {
    if extent > 0.0 {
        f32::from_bits(extent.to_bits() - 1)
    } else {
        0.0
    }
}
