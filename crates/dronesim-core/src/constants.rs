//! Simulation constants and tuning parameters.

/// Physics tick rate (Hz).
pub const TICK_RATE: u32 = 20;

/// Seconds per tick.
pub const DT: f32 = 1.0 / TICK_RATE as f32;

/// Milliseconds per tick.
pub const TICK_INTERVAL_MS: u64 = 1000 / TICK_RATE as u64;

// --- Map ---

pub const DEFAULT_MAP_WIDTH: i32 = 120;
pub const DEFAULT_MAP_HEIGHT: i32 = 40;

/// Distance kept from the far edge when the drone is clamped against it.
pub const DEFAULT_CLAMP_MARGIN: f32 = 1.0;

// --- Drone dynamics ---

pub const DEFAULT_MASS: f32 = 1.0;
pub const DEFAULT_FRICTION_COEFFICIENT: f32 = 0.5;

/// Force added per axis by one directional key press.
pub const DEFAULT_FORCE_STEP: f32 = 1.0;

/// Velocity multiplier applied by the brake key.
pub const BRAKE_FACTOR: f32 = 0.5;

// --- Hit detection ---

/// Maximum drone-to-object distance (cells) that counts as a hit.
pub const DEFAULT_HIT_THRESHOLD: f32 = 1.0;

/// Objects sit on integer cells; their center is offset by half a cell.
pub const OBJECT_CENTER_OFFSET: f32 = 0.5;

// --- Repulsive field (optional) ---

/// Influence radius of an obstacle's potential field.
pub const REPULSION_RHO0: f32 = 2.0;
/// Distance floor used to avoid the singularity at the obstacle.
pub const REPULSION_MIN_RHO: f32 = 0.5;
/// Field gain.
pub const REPULSION_ETA: f32 = 40.0;
/// Per-axis magnitude clip.
pub const REPULSION_MAX_FORCE: f32 = 15.0;

// --- Objects ---

pub const DEFAULT_NUM_OBSTACLES: usize = 10;
pub const DEFAULT_NUM_TARGETS: usize = 10;

/// Upper bound on objects per set accepted from settings.
pub const MAX_OBJECTS: usize = 4096;

/// Regeneration period of both generators.
pub const GENERATOR_PERIOD_SECS: u64 = 15;

// --- Relay ---

/// Bounded wait of the router's multiplexed read.
pub const ROUTER_WAIT_MS: u64 = 1000;

/// Attempts made to reach the router socket before giving up.
pub const CONNECT_ATTEMPTS: u32 = 50;
pub const CONNECT_BACKOFF_MS: u64 = 100;

/// A consumer that does not drain its stream for this long is dropped.
pub const SUBSCRIBER_WRITE_TIMEOUT_MS: u64 = 1000;

// --- Supervision ---

pub const HEARTBEAT_INTERVAL_MS: u64 = 2_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const STARTUP_TIMEOUT_MS: u64 = 5_000;
pub const TEARDOWN_GRACE_MS: u64 = 2_000;

// --- Shared state ---

/// Attempts made by non-owners before the store is declared unavailable.
pub const SHM_OPEN_ATTEMPTS: u32 = 20;
pub const SHM_OPEN_BACKOFF_MS: u64 = 100;

// --- Process exit codes ---

/// Only reachable through the terminate protocol.
pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// The input relay saw the quit key.
pub const EXIT_USER_QUIT: i32 = 3;
