//! Core types and definitions for the drone simulation group.
//!
//! This crate defines the vocabulary shared by every process in the group:
//! kinematic state, bounds, objects, key commands, the textual wire and
//! control codecs, constants and settings. It performs no I/O besides
//! reading the settings file.

pub mod commands;
pub mod constants;
pub mod control;
pub mod enums;
pub mod error;
pub mod settings;
pub mod types;
pub mod wire;

pub use error::ProtocolError;
