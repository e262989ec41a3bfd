//! Drone simulation process group.
//!
//! This crate owns everything that touches the operating system: the
//! shared-memory store, the relay socket and its framed channels, one module
//! per worker role, the supervisor and the launcher behind the `dronesim`
//! binary.

pub mod channel;
pub mod error;
pub mod generator_loop;
pub mod input;
pub mod launcher;
pub mod logging;
pub mod physics_loop;
pub mod router;
pub mod shared_state;
pub mod signals;
pub mod supervisor;
pub mod viewer;
pub mod worker;

pub use dronesim_core as core;
pub use dronesim_sim as sim;
pub use error::AppError;
