//! Proximity hit test between the drone and an object set.

use glam::Vec2;

use dronesim_core::types::ObjectSet;

/// Flag every object whose center lies within `threshold` of the drone.
/// Returns how many objects were hit for the first time; an object that is
/// already hit is skipped, so repeated calls never count it again.
pub fn run(drone_position: Vec2, objects: &mut ObjectSet, threshold: f32) -> u32 {
    let mut newly_hit = 0;
    for object in objects.iter_mut().filter(|o| !o.hit) {
        if drone_position.distance(object.center()) <= threshold && object.mark_hit() {
            newly_hit += 1;
        }
    }
    newly_hit
}
