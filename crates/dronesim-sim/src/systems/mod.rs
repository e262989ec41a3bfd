//! Per-tick systems applied to the drone and the object sets.
//!
//! Systems are free functions over plain data. They do not own state; the
//! engine decides the order they run in.

pub mod boundary;
pub mod hit_test;
pub mod integration;
#[cfg(feature = "repulsion")]
pub mod repulsion;
