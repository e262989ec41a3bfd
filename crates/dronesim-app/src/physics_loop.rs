//! Physics process: drives the engine at the tick rate against shared state.
//!
//! Relay traffic (keys, resizes, object sets) and control messages land on
//! one queue. Each iteration drains the queue, runs one tick with the drone
//! region locked, credits newly hit targets to the score region and sleeps
//! until the next tick.

use std::io;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use dronesim_core::commands::KeyCommand;
use dronesim_core::constants::TICK_RATE;
use dronesim_core::enums::Consumer;
use dronesim_core::types::{DroneState, Score};
use dronesim_core::wire::WireMessage;
use dronesim_sim::{EngineCommand, PhysicsConfig, PhysicsEngine, TickReport};

use crate::error::AppError;
use crate::shared_state::{Access, SharedRegion};
use crate::worker::{
    spawn_control_reader, spawn_subscription_reader, Directive, Inbound, WorkerContext, WorkerExit,
};

/// Nominal duration of one tick.
const TICK_DURATION: Duration = Duration::from_nanos(1_000_000_000 / TICK_RATE as u64);

/// Relay message to engine command. Quit and unmapped keys yield nothing.
pub fn translate(message: WireMessage) -> Option<EngineCommand> {
    match message {
        WireMessage::Resize(bounds) => Some(EngineCommand::Resize(bounds)),
        WireMessage::Objects(set) => Some(EngineCommand::ReplaceObjects(set)),
        WireMessage::Key(key) => match KeyCommand::from_key(key)? {
            KeyCommand::Quit => None,
            command => Some(EngineCommand::Key(command)),
        },
    }
}

pub struct PhysicsLoop {
    engine: PhysicsEngine,
    drone: SharedRegion<DroneState>,
    score: SharedRegion<Score>,
}

impl PhysicsLoop {
    pub fn new(
        engine: PhysicsEngine,
        drone: SharedRegion<DroneState>,
        score: SharedRegion<Score>,
    ) -> Self {
        Self {
            engine,
            drone,
            score,
        }
    }

    pub fn engine(&self) -> &PhysicsEngine {
        &self.engine
    }

    pub fn queue(&mut self, message: WireMessage) {
        match translate(message) {
            Some(command) => self.engine.queue_command(command),
            None => tracing::trace!("message has no engine effect"),
        }
    }

    /// One tick. Shared state that can no longer be read or written is fatal.
    pub fn step(&mut self) -> Result<TickReport, AppError> {
        let engine = &mut self.engine;
        let report = self.drone.write(|drone| engine.tick(drone))?;
        if report.targets_hit > 0 {
            let score = self.score.write(|score| {
                score.credit(report.targets_hit);
                score.value
            })?;
            tracing::info!(tick = report.tick, hit = report.targets_hit, score, "target hit");
        }
        if report.obstacles_hit > 0 {
            tracing::info!(tick = report.tick, hit = report.obstacles_hit, "obstacle hit");
        }
        if report.clamped.any() {
            tracing::debug!(tick = report.tick, clamped = ?report.clamped, "wall contact");
        }
        Ok(report)
    }

    /// Drain pending events. Returns the exit to take, if any.
    fn drain(
        &mut self,
        events: &Receiver<Inbound<WireMessage>>,
        ctx: &mut WorkerContext,
    ) -> Result<Option<WorkerExit>, AppError> {
        loop {
            match events.try_recv() {
                Ok(Inbound::Data(message)) => self.queue(message),
                Ok(Inbound::Control(message)) => match ctx.on_control(message)? {
                    Directive::Terminate => return Ok(Some(WorkerExit::Clean)),
                    directive => tracing::trace!(?directive, "control ignored"),
                },
                Ok(Inbound::PeerClosed) => {
                    let err = AppError::PeerClosed("relay subscription".into());
                    tracing::warn!(error = %err, "no further relay input");
                }
                Ok(Inbound::SupervisorLost) | Err(TryRecvError::Disconnected) => {
                    return Err(AppError::PeerClosed("supervisor control stream".into()));
                }
                Err(TryRecvError::Empty) => return Ok(None),
            }
        }
    }
}

pub fn run(ctx: &mut WorkerContext) -> Result<WorkerExit, AppError> {
    let regions = ctx.paths.regions();
    let drone = ctx.open_region::<DroneState>(&regions.drone, Access::ReadWrite)?;
    let score = ctx.open_region::<Score>(&regions.score, Access::ReadWrite)?;

    let config = PhysicsConfig::from_settings(&ctx.settings)
        .map_err(|e| AppError::ResourceUnavailable(format!("settings: {e}")))?;
    let mut physics = PhysicsLoop::new(PhysicsEngine::new(config), drone, score);

    let (tx, rx) = mpsc::channel();
    let subscription = ctx.subscription(Consumer::Physics)?;
    spawn_subscription_reader(subscription, tx.clone())
        .map_err(|e| AppError::ResourceUnavailable(format!("relay thread: {e}")))?;
    spawn_control_reader(io::stdin(), tx)
        .map_err(|e| AppError::ResourceUnavailable(format!("control thread: {e}")))?;

    ctx.announce_ready()?;

    let mut next_tick_time = Instant::now();
    loop {
        if let Some(exit) = physics.drain(&rx, ctx)? {
            tracing::info!(ticks = physics.engine().time().tick, "physics stopped");
            return Ok(exit);
        }

        physics.step()?;

        next_tick_time += TICK_DURATION;
        let now = Instant::now();
        if next_tick_time > now {
            std::thread::sleep(next_tick_time - now);
        } else if now - next_tick_time > TICK_DURATION * 2 {
            // Too far behind; skip the missed ticks instead of bursting.
            next_tick_time = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronesim_core::enums::{ObjectKind, SharedStateMode};
    use dronesim_core::types::{GameBounds, ObjectSet};
    use glam::Vec2;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(0);

    fn physics_at(position: Vec2) -> (PhysicsLoop, SharedRegion<DroneState>, SharedRegion<Score>) {
        let id = format!("{}-{}", std::process::id(), NEXT.fetch_add(1, Ordering::Relaxed));
        let drone_name = format!("/dronesim-physics-test-{id}-drone");
        let score_name = format!("/dronesim-physics-test-{id}-score");
        let mode = SharedStateMode::Locked;

        let drone_owner =
            SharedRegion::create(&drone_name, DroneState::at_rest(position), mode).unwrap();
        let score_owner = SharedRegion::create(&score_name, Score::default(), mode).unwrap();
        let drone = SharedRegion::open(&drone_name, Access::ReadWrite, mode).unwrap();
        let score = SharedRegion::open(&score_name, Access::ReadWrite, mode).unwrap();

        let config = PhysicsConfig {
            bounds: GameBounds::new(120, 40).unwrap(),
            ..PhysicsConfig::default()
        };
        (
            PhysicsLoop::new(PhysicsEngine::new(config), drone, score),
            drone_owner,
            score_owner,
        )
    }

    fn single(kind: ObjectKind, x: i32, y: i32) -> WireMessage {
        let mut set = ObjectSet::empty(kind);
        set.push(x, y);
        WireMessage::Objects(set)
    }

    #[test]
    fn test_translate() {
        let bounds = GameBounds::new(80, 24).unwrap();
        assert_eq!(
            translate(WireMessage::Resize(bounds)),
            Some(EngineCommand::Resize(bounds))
        );
        assert_eq!(
            translate(WireMessage::Key(b'd')),
            Some(EngineCommand::Key(KeyCommand::RemoveForces))
        );
        assert_eq!(translate(WireMessage::Key(b'p')), None);
        assert_eq!(translate(WireMessage::Key(b'z')), None);
    }

    #[test]
    fn test_target_under_spawn_scores_once() {
        let (mut physics, drone, score) = physics_at(Vec2::new(10.0, 10.0));
        physics.queue(single(ObjectKind::Target, 10, 10));

        let report = physics.step().unwrap();
        assert_eq!(report.targets_hit, 1);
        assert_eq!(score.read().unwrap().value, 1.0);
        assert!(physics.engine().targets().as_slice()[0].hit);

        physics.step().unwrap();
        assert_eq!(score.read().unwrap().value, 1.0);
        assert_eq!(drone.read().unwrap().position, Vec2::new(10.0, 10.0));
    }

    #[test]
    fn test_obstacle_hit_leaves_score_alone() {
        let (mut physics, _drone, score) = physics_at(Vec2::new(10.0, 10.0));
        physics.queue(single(ObjectKind::Obstacle, 10, 10));
        let report = physics.step().unwrap();
        assert_eq!(report.obstacles_hit, 1);
        assert_eq!(score.read().unwrap().value, 0.0);
    }

    #[test]
    fn test_key_moves_the_shared_drone() {
        let (mut physics, drone, _score) = physics_at(Vec2::new(60.0, 20.0));
        physics.queue(WireMessage::Key(b'f'));
        for _ in 0..5 {
            physics.step().unwrap();
        }
        let state = drone.read().unwrap();
        assert!(state.position.x > 60.0);
        assert_eq!(state.position.y, 20.0);
        assert!(state.force.x > 0.0);
    }

    #[test]
    fn test_quit_key_is_not_an_engine_command() {
        let (mut physics, drone, _score) = physics_at(Vec2::new(60.0, 20.0));
        physics.queue(WireMessage::Key(b'p'));
        physics.step().unwrap();
        assert_eq!(drone.read().unwrap(), DroneState::at_rest(Vec2::new(60.0, 20.0)));
    }
}
