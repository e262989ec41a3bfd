//! Randomised obstacle and target sets.
//!
//! A generator draws `count` independent, uniformly distributed cells from
//! the spawn area of the current bounds and returns them as one complete
//! set. Same seed and same bounds give the same sequence of sets.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use dronesim_core::enums::ObjectKind;
use dronesim_core::types::{GameBounds, ObjectSet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("no map bounds received yet")]
    NoBounds,
    #[error("a {width}x{height} map leaves no room to place objects")]
    BoundsTooSmall { width: i32, height: i32 },
    #[error("cannot allocate room for {count} objects")]
    Allocation { count: usize },
}

pub struct ObjectGenerator {
    kind: ObjectKind,
    count: usize,
    bounds: Option<GameBounds>,
    rng: ChaCha8Rng,
}

impl ObjectGenerator {
    pub fn new(kind: ObjectKind, count: usize, seed: u64) -> Self {
        Self {
            kind,
            count,
            bounds: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn bounds(&self) -> Option<GameBounds> {
        self.bounds
    }

    /// Adopt new bounds. The next set is drawn from the new spawn area.
    pub fn set_bounds(&mut self, bounds: GameBounds) {
        self.bounds = Some(bounds);
    }

    /// Draw a fresh, complete set.
    pub fn generate(&mut self) -> Result<ObjectSet, GenerateError> {
        let bounds = self.bounds.ok_or(GenerateError::NoBounds)?;
        let ((min_x, max_x), (min_y, max_y)) =
            bounds
                .spawn_area()
                .ok_or(GenerateError::BoundsTooSmall {
                    width: bounds.width(),
                    height: bounds.height(),
                })?;

        let mut set = ObjectSet::try_with_capacity(self.kind, self.count)
            .map_err(|_| GenerateError::Allocation { count: self.count })?;

        for _ in 0..self.count {
            let x = self.rng.gen_range(min_x..=max_x);
            let y = self.rng.gen_range(min_y..=max_y);
            set.push(x, y);
        }
        Ok(set)
    }
}
