//! Headless physics engine and object generator for the drone simulation.
//!
//! Nothing in this crate touches processes, sockets or shared memory: the
//! engine mutates a `DroneState` handed to it and reports what happened, so
//! every behavior can be tested deterministically.

pub mod engine;
pub mod generator;
pub mod systems;

pub use dronesim_core as core;
pub use engine::{EngineCommand, EnginePhase, PhysicsConfig, PhysicsEngine, TickReport};
pub use generator::{GenerateError, ObjectGenerator};
