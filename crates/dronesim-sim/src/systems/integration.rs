//! Kinematic integration.
//!
//! Friction opposes velocity (`-c * v`), the acceleration is the net force
//! over the mass, then velocity and position advance by one step:
//! `v += a * dt`, `p += v * dt + 0.5 * a * dt^2`.

use glam::Vec2;

use dronesim_core::types::DroneState;

/// Integrate one step. `external` is added to the accumulated key force
/// (the repulsive field when enabled, zero otherwise).
pub fn run(drone: &mut DroneState, external: Vec2, mass: f32, friction_coefficient: f32, dt: f32) {
    let friction = -friction_coefficient * drone.velocity;
    let acceleration = (drone.force + external + friction) / mass;

    drone.velocity += acceleration * dt;
    drone.position += drone.velocity * dt + 0.5 * acceleration * dt * dt;
}
