//! Fundamental kinematic and map types.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAP_HEIGHT, DEFAULT_MAP_WIDTH, OBJECT_CENTER_OFFSET};
use crate::enums::ObjectKind;
use crate::error::ProtocolError;

/// Kinematic state of the drone. Lives in shared memory, so the layout is fixed.
/// x grows to the right, y grows downwards (screen coordinates).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct DroneState {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Force accumulated from key presses.
    pub force: Vec2,
}

impl DroneState {
    pub fn new(position: Vec2, velocity: Vec2, force: Vec2) -> Self {
        Self {
            position,
            velocity,
            force,
        }
    }

    /// A drone at `position` with no velocity and no force.
    pub fn at_rest(position: Vec2) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Euclidean distance from the drone to a point.
    pub fn distance_to(&self, point: Vec2) -> f32 {
        self.position.distance(point)
    }
}

/// Running score, stored in its own shared region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Score {
    pub value: f32,
}

impl Score {
    /// Credit newly hit targets. Never decreases the score.
    pub fn credit(&mut self, targets: u32) {
        self.value += targets as f32;
    }
}

/// Map bounds. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(i32, i32)", into = "(i32, i32)")]
pub struct GameBounds {
    width: i32,
    height: i32,
}

impl GameBounds {
    pub fn new(width: i32, height: i32) -> Result<Self, ProtocolError> {
        if width <= 0 || height <= 0 {
            return Err(ProtocolError::InvalidBounds { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Inclusive coordinate range generators may place objects in:
    /// `[1, width-2] x [1, height-2]`. `None` when the map is too small.
    pub fn spawn_area(&self) -> Option<((i32, i32), (i32, i32))> {
        let max_x = self.width - 2;
        let max_y = self.height - 2;
        if max_x < 1 || max_y < 1 {
            return None;
        }
        Some(((1, max_x), (1, max_y)))
    }
}

impl Default for GameBounds {
    fn default() -> Self {
        Self {
            width: DEFAULT_MAP_WIDTH,
            height: DEFAULT_MAP_HEIGHT,
        }
    }
}

impl TryFrom<(i32, i32)> for GameBounds {
    type Error = ProtocolError;

    fn try_from((width, height): (i32, i32)) -> Result<Self, Self::Error> {
        Self::new(width, height)
    }
}

impl From<GameBounds> for (i32, i32) {
    fn from(bounds: GameBounds) -> Self {
        (bounds.width, bounds.height)
    }
}

/// An obstacle or target on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub x: i32,
    pub y: i32,
    pub kind: ObjectKind,
    /// Sticky: once set it never clears for this object.
    pub hit: bool,
}

impl Object {
    pub fn new(x: i32, y: i32, kind: ObjectKind) -> Self {
        Self {
            x,
            y,
            kind,
            hit: false,
        }
    }

    /// Center of the object's cell.
    pub fn center(&self) -> Vec2 {
        Vec2::new(
            self.x as f32 + OBJECT_CENTER_OFFSET,
            self.y as f32 + OBJECT_CENTER_OFFSET,
        )
    }

    /// Flag the object as hit. Returns true only on the first call.
    pub fn mark_hit(&mut self) -> bool {
        if self.hit {
            return false;
        }
        self.hit = true;
        true
    }
}

/// A complete, homogeneous set of objects. Sets are replaced wholesale,
/// never edited element by element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSet {
    kind: ObjectKind,
    objects: Vec<Object>,
}

impl ObjectSet {
    pub fn empty(kind: ObjectKind) -> Self {
        Self {
            kind,
            objects: Vec::new(),
        }
    }

    /// Empty set with room for `capacity` objects. Reports allocation failure
    /// instead of aborting.
    pub fn try_with_capacity(
        kind: ObjectKind,
        capacity: usize,
    ) -> Result<Self, std::collections::TryReserveError> {
        let mut objects = Vec::new();
        objects.try_reserve_exact(capacity)?;
        Ok(Self { kind, objects })
    }

    /// Append an object of this set's kind at `(x, y)`.
    pub fn push(&mut self, x: i32, y: i32) {
        self.objects.push(Object::new(x, y, self.kind));
    }

    /// Build a set, rejecting objects of the wrong kind.
    pub fn from_objects(kind: ObjectKind, objects: Vec<Object>) -> Result<Self, ProtocolError> {
        if let Some(stray) = objects.iter().find(|o| o.kind != kind) {
            return Err(ProtocolError::MixedObjectKinds {
                expected: kind,
                found: stray.kind,
            });
        }
        Ok(Self { kind, objects })
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Allocated slots, tracked alongside the data.
    pub fn capacity(&self) -> usize {
        self.objects.capacity()
    }

    pub fn as_slice(&self) -> &[Object] {
        &self.objects
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Object> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Object> {
        self.objects.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Object> {
        self.objects.get(index)
    }

    /// Number of objects already hit.
    pub fn hit_count(&self) -> usize {
        self.objects.iter().filter(|o| o.hit).count()
    }

    /// Swap in a complete replacement set. The previous set is discarded.
    pub fn replace(&mut self, next: ObjectSet) -> Result<(), ProtocolError> {
        if next.kind != self.kind {
            return Err(ProtocolError::MixedObjectKinds {
                expected: self.kind,
                found: next.kind,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn into_objects(self) -> Vec<Object> {
        self.objects
    }
}

/// Simulation time tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimTime {
    /// Current tick number (increments by 1 each tick).
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub elapsed_secs: f64,
}

impl SimTime {
    /// Advance by one tick of length `dt`.
    pub fn advance(&mut self, dt: f32) {
        self.tick += 1;
        self.elapsed_secs += dt as f64;
    }
}
