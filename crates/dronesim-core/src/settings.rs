//! Group configuration, read from `appsettings.json`.
//!
//! The top-level keys are the long-standing `appsettings.json` ones. The
//! extra sections are optional and fall back to [`crate::constants`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;
use crate::enums::SharedStateMode;
use crate::types::{DroneState, GameBounds};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

impl SettingsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SettingsError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    pub num_obstacles: usize,
    pub num_targets: usize,
    #[serde(rename = "MapDimensionX")]
    pub map_dimension_x: i32,
    #[serde(rename = "MapDimensionY")]
    pub map_dimension_y: i32,
    pub drone_initial_position: InitialDrone,
    pub physics: PhysicsSettings,
    pub watchdog: WatchdogSettings,
    pub generator: GeneratorSettings,
    pub shared_state: SharedStateMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_obstacles: DEFAULT_NUM_OBSTACLES,
            num_targets: DEFAULT_NUM_TARGETS,
            map_dimension_x: DEFAULT_MAP_WIDTH,
            map_dimension_y: DEFAULT_MAP_HEIGHT,
            drone_initial_position: InitialDrone::default(),
            physics: PhysicsSettings::default(),
            watchdog: WatchdogSettings::default(),
            generator: GeneratorSettings::default(),
            shared_state: SharedStateMode::default(),
        }
    }
}

impl Settings {
    /// Read and validate a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn bounds(&self) -> Result<GameBounds, SettingsError> {
        GameBounds::new(self.map_dimension_x, self.map_dimension_y)
            .map_err(|e| SettingsError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.bounds()?;
        for (name, count) in [
            ("NumObstacles", self.num_obstacles),
            ("NumTargets", self.num_targets),
        ] {
            if count > MAX_OBJECTS {
                return Err(SettingsError::Invalid(format!(
                    "{name} is {count}, at most {MAX_OBJECTS} allowed"
                )));
            }
        }
        self.physics.validate()?;
        self.watchdog.validate()?;
        if self.generator.period_secs == 0 {
            return Err(SettingsError::Invalid(
                "Generator.PeriodSecs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Spawn state of the drone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InitialDrone {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub force: [f32; 2],
}

impl Default for InitialDrone {
    fn default() -> Self {
        Self {
            position: [
                DEFAULT_MAP_WIDTH as f32 / 2.0,
                DEFAULT_MAP_HEIGHT as f32 / 2.0,
            ],
            velocity: [0.0, 0.0],
            force: [0.0, 0.0],
        }
    }
}

impl InitialDrone {
    pub fn to_state(&self) -> DroneState {
        DroneState::new(
            Vec2::from(self.position),
            Vec2::from(self.velocity),
            Vec2::from(self.force),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PhysicsSettings {
    pub mass: f32,
    pub friction_coefficient: f32,
    pub hit_threshold: f32,
    pub clamp_margin: f32,
    pub force_step: f32,
    /// Add the obstacle potential field to the force balance. Only honoured
    /// when the engine is built with the `repulsion` feature.
    pub repulsion: bool,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            mass: DEFAULT_MASS,
            friction_coefficient: DEFAULT_FRICTION_COEFFICIENT,
            hit_threshold: DEFAULT_HIT_THRESHOLD,
            clamp_margin: DEFAULT_CLAMP_MARGIN,
            force_step: DEFAULT_FORCE_STEP,
            repulsion: false,
        }
    }
}

impl PhysicsSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        let positive = [
            ("Physics.Mass", self.mass),
            ("Physics.HitThreshold", self.hit_threshold),
            ("Physics.ForceStep", self.force_step),
            ("Physics.ClampMargin", self.clamp_margin),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SettingsError::Invalid(format!("{name} must be positive")));
            }
        }
        let friction = self.friction_coefficient;
        if !friction.is_finite() || friction < 0.0 {
            return Err(SettingsError::Invalid(
                "Physics.FrictionCoefficient must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WatchdogSettings {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub teardown_grace_ms: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            startup_timeout_ms: STARTUP_TIMEOUT_MS,
            teardown_grace_ms: TEARDOWN_GRACE_MS,
        }
    }
}

impl WatchdogSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "Watchdog heartbeat interval and timeout must be positive".into(),
            ));
        }
        if self.heartbeat_interval_ms >= self.heartbeat_timeout_ms {
            return Err(SettingsError::Invalid(
                "Watchdog.HeartbeatIntervalMs must be shorter than HeartbeatTimeoutMs".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GeneratorSettings {
    pub period_secs: u64,
    /// Fixed RNG seed; entropy when absent. Each generator offsets it by kind.
    pub seed: Option<u64>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            period_secs: GENERATOR_PERIOD_SECS,
            seed: None,
        }
    }
}

impl GeneratorSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}
