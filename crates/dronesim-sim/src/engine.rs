//! Physics engine: the per-tick state machine of the drone.
//!
//! `PhysicsEngine` owns the map bounds and both object sets, applies queued
//! commands at the tick boundary and runs the systems in a fixed order:
//! integration, boundary clamp, hit test. The drone itself is passed in by
//! the caller, which keeps it in shared memory.

use std::collections::VecDeque;

use glam::Vec2;

use dronesim_core::commands::KeyCommand;
use dronesim_core::constants::{BRAKE_FACTOR, DT};
use dronesim_core::enums::ObjectKind;
use dronesim_core::settings::{Settings, SettingsError};
use dronesim_core::types::{DroneState, GameBounds, ObjectSet, SimTime};

use crate::systems;
use crate::systems::boundary::Clamped;

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    pub bounds: GameBounds,
    /// State the drone returns to on reset.
    pub spawn: DroneState,
    pub mass: f32,
    pub friction_coefficient: f32,
    pub hit_threshold: f32,
    pub clamp_margin: f32,
    pub force_step: f32,
    pub repulsion: bool,
    pub dt: f32,
}

impl PhysicsConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let physics = &settings.physics;
        Ok(Self {
            bounds: settings.bounds()?,
            spawn: settings.drone_initial_position.to_state(),
            mass: physics.mass,
            friction_coefficient: physics.friction_coefficient,
            hit_threshold: physics.hit_threshold,
            clamp_margin: physics.clamp_margin,
            force_step: physics.force_step,
            repulsion: physics.repulsion,
            dt: DT,
        })
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        let settings = Settings::default();
        let physics = &settings.physics;
        Self {
            bounds: GameBounds::default(),
            spawn: settings.drone_initial_position.to_state(),
            mass: physics.mass,
            friction_coefficient: physics.friction_coefficient,
            hit_threshold: physics.hit_threshold,
            clamp_margin: physics.clamp_margin,
            force_step: physics.force_step,
            repulsion: physics.repulsion,
            dt: DT,
        }
    }
}

/// Engine lifecycle. There is no pause: once running, every tick integrates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnginePhase {
    #[default]
    Idle,
    Running,
}

/// Input applied at the next tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Key(KeyCommand),
    Resize(GameBounds),
    /// A complete replacement for the set of the same kind.
    ReplaceObjects(ObjectSet),
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub obstacles_hit: u32,
    /// Targets hit for the first time. This is the amount the score grows by.
    pub targets_hit: u32,
    pub clamped: Clamped,
}

pub struct PhysicsEngine {
    config: PhysicsConfig,
    bounds: GameBounds,
    obstacles: ObjectSet,
    targets: ObjectSet,
    time: SimTime,
    phase: EnginePhase,
    command_queue: VecDeque<EngineCommand>,
}

impl PhysicsEngine {
    pub fn new(config: PhysicsConfig) -> Self {
        if config.repulsion && !cfg!(feature = "repulsion") {
            tracing::warn!("repulsion requested but the engine was built without it; ignoring");
        }
        Self {
            bounds: config.bounds,
            config,
            obstacles: ObjectSet::empty(ObjectKind::Obstacle),
            targets: ObjectSet::empty(ObjectKind::Target),
            time: SimTime::default(),
            phase: EnginePhase::default(),
            command_queue: VecDeque::new(),
        }
    }

    pub fn queue_command(&mut self, command: EngineCommand) {
        self.command_queue.push_back(command);
    }

    pub fn queue_commands(&mut self, commands: impl IntoIterator<Item = EngineCommand>) {
        self.command_queue.extend(commands);
    }

    /// Apply pending commands, then advance the drone by one tick.
    pub fn tick(&mut self, drone: &mut DroneState) -> TickReport {
        self.process_commands(drone);
        self.phase = EnginePhase::Running;

        let external = self.external_force(drone.position);
        systems::integration::run(
            drone,
            external,
            self.config.mass,
            self.config.friction_coefficient,
            self.config.dt,
        );
        let clamped = systems::boundary::run(drone, self.bounds, self.config.clamp_margin);

        let threshold = self.config.hit_threshold;
        let obstacles_hit = systems::hit_test::run(drone.position, &mut self.obstacles, threshold);
        let targets_hit = systems::hit_test::run(drone.position, &mut self.targets, threshold);

        self.time.advance(self.config.dt);

        TickReport {
            tick: self.time.tick,
            obstacles_hit,
            targets_hit,
            clamped,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn bounds(&self) -> GameBounds {
        self.bounds
    }

    pub fn obstacles(&self) -> &ObjectSet {
        &self.obstacles
    }

    pub fn targets(&self) -> &ObjectSet {
        &self.targets
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    fn process_commands(&mut self, drone: &mut DroneState) {
        while let Some(command) = self.command_queue.pop_front() {
            self.handle_command(command, drone);
        }
    }

    fn handle_command(&mut self, command: EngineCommand, drone: &mut DroneState) {
        match command {
            EngineCommand::Key(key) => self.apply_key(key, drone),
            EngineCommand::Resize(bounds) => {
                tracing::debug!(width = bounds.width(), height = bounds.height(), "bounds changed");
                self.bounds = bounds;
            }
            EngineCommand::ReplaceObjects(set) => {
                let slot = match set.kind() {
                    ObjectKind::Obstacle => &mut self.obstacles,
                    ObjectKind::Target => &mut self.targets,
                };
                tracing::debug!(kind = %set.kind(), count = set.len(), "object set replaced");
                *slot = set;
            }
        }
    }

    fn apply_key(&self, key: KeyCommand, drone: &mut DroneState) {
        match key {
            KeyCommand::Thrust { direction } => {
                drone.force += direction * self.config.force_step;
            }
            KeyCommand::RemoveForces => drone.force = Vec2::ZERO,
            KeyCommand::Brake => {
                drone.force = Vec2::ZERO;
                drone.velocity *= BRAKE_FACTOR;
            }
            KeyCommand::Reset => *drone = self.config.spawn,
            KeyCommand::Quit => {}
        }
    }

    #[cfg(feature = "repulsion")]
    fn external_force(&self, position: Vec2) -> Vec2 {
        if self.config.repulsion {
            systems::repulsion::field(position, &self.obstacles)
        } else {
            Vec2::ZERO
        }
    }

    #[cfg(not(feature = "repulsion"))]
    fn external_force(&self, _position: Vec2) -> Vec2 {
        Vec2::ZERO
    }
}
