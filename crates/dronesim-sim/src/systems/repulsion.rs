//! Potential-field repulsion from obstacles.
//!
//! Each obstacle within `REPULSION_RHO0` pushes the drone away with
//! magnitude `eta * (1/rho - 1/rho0) / rho^2`. The distance is floored at
//! `REPULSION_MIN_RHO` and the summed force is clipped per axis.

use glam::Vec2;

use dronesim_core::constants::{
    REPULSION_ETA, REPULSION_MAX_FORCE, REPULSION_MIN_RHO, REPULSION_RHO0,
};
use dronesim_core::types::ObjectSet;

/// Summed repulsive force acting on a drone at `position`.
pub fn field(position: Vec2, obstacles: &ObjectSet) -> Vec2 {
    let mut total = Vec2::ZERO;
    for obstacle in obstacles.iter() {
        let offset = position - obstacle.center();
        let distance = offset.length();
        if distance >= REPULSION_RHO0 {
            continue;
        }
        let rho = distance.max(REPULSION_MIN_RHO);
        let magnitude = REPULSION_ETA * (1.0 / rho - 1.0 / REPULSION_RHO0) / (rho * rho);
        // Sitting exactly on the center gives no direction; push nowhere.
        let direction = offset.try_normalize().unwrap_or(Vec2::ZERO);
        total += direction * magnitude;
    }
    total.clamp(
        Vec2::splat(-REPULSION_MAX_FORCE),
        Vec2::splat(REPULSION_MAX_FORCE),
    )
}
