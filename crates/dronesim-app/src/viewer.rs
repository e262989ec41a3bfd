//! Headless stand-in for the presentation layer.
//!
//! The viewer maps the shared state read-only, announces the map size on the
//! size channel and follows the object sets routed to it. Once per second it
//! logs a snapshot; at debug level the snapshot includes an ASCII frame.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use dronesim_core::enums::{ChannelId, Consumer, ObjectKind};
use dronesim_core::types::{DroneState, GameBounds, ObjectSet, Score};
use dronesim_core::wire::WireMessage;

use crate::channel::Producer;
use crate::error::AppError;
use crate::shared_state::{Access, SharedRegion};
use crate::worker::{
    spawn_control_reader, spawn_subscription_reader, Directive, Inbound, WorkerContext, WorkerExit,
};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Frames larger than this show only their top-left corner.
pub const MAX_FRAME_COLUMNS: usize = 400;
pub const MAX_FRAME_ROWS: usize = 200;

/// What the viewer knows besides the shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub bounds: GameBounds,
    pub obstacles: ObjectSet,
    pub targets: ObjectSet,
    pub last_key: Option<u8>,
}

impl ViewState {
    pub fn new(bounds: GameBounds) -> Self {
        Self {
            bounds,
            obstacles: ObjectSet::empty(ObjectKind::Obstacle),
            targets: ObjectSet::empty(ObjectKind::Target),
            last_key: None,
        }
    }

    pub fn apply(&mut self, message: WireMessage) {
        match message {
            WireMessage::Resize(bounds) => self.bounds = bounds,
            WireMessage::Key(key) => self.last_key = Some(key),
            WireMessage::Objects(set) => match set.kind() {
                ObjectKind::Obstacle => self.obstacles = set,
                ObjectKind::Target => self.targets = set,
            },
        }
    }

    /// Draw one frame. Row 0 is the top of the map.
    pub fn render(&self, drone: &DroneState, score: Score) -> String {
        let width = (self.bounds.width() as usize).min(MAX_FRAME_COLUMNS);
        let height = (self.bounds.height() as usize).min(MAX_FRAME_ROWS);
        let mut grid = vec![vec!['.'; width]; height];

        let mut put = |x: i32, y: i32, glyph: char| {
            if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
                grid[y as usize][x as usize] = glyph;
            }
        };
        for object in self.obstacles.iter().chain(self.targets.iter()) {
            let glyph = if object.hit { '+' } else { object.kind.symbol() };
            put(object.x, object.y, glyph);
        }
        put(
            drone.position.x.floor() as i32,
            drone.position.y.floor() as i32,
            'X',
        );

        let mut frame = format!(
            "score {:.0}  drone ({:.1}, {:.1})",
            score.value, drone.position.x, drone.position.y
        );
        if (width, height) != (self.bounds.width() as usize, self.bounds.height() as usize) {
            frame.push_str(&format!("  clipped to {width}x{height}"));
        }
        frame.push('\n');
        for row in grid {
            frame.extend(row);
            frame.push('\n');
        }
        frame
    }
}

fn announce(size: &mut Option<Producer>, bounds: GameBounds) {
    let Some(producer) = size.as_mut() else {
        return;
    };
    if let Err(err) = producer.publish(&WireMessage::Resize(bounds)) {
        let err = AppError::PeerClosed(format!("size producer ({err})"));
        tracing::warn!(error = %err, "relay path disabled");
        *size = None;
    }
}

pub fn run(ctx: &mut WorkerContext) -> Result<WorkerExit, AppError> {
    let regions = ctx.paths.regions();
    let drone = ctx.open_region::<DroneState>(&regions.drone, Access::ReadOnly)?;
    let score = ctx.open_region::<Score>(&regions.score, Access::ReadOnly)?;
    let bounds = ctx
        .settings
        .bounds()
        .map_err(|e| AppError::ResourceUnavailable(format!("settings: {e}")))?;

    let mut size = Some(ctx.producer(ChannelId::Size)?);
    let (tx, rx) = mpsc::channel();
    let subscription = ctx.subscription(Consumer::Viewer)?;
    spawn_subscription_reader(subscription, tx.clone())
        .map_err(|e| AppError::ResourceUnavailable(format!("relay thread: {e}")))?;
    spawn_control_reader(io::stdin(), tx)
        .map_err(|e| AppError::ResourceUnavailable(format!("control thread: {e}")))?;

    ctx.announce_ready()?;
    announce(&mut size, bounds);

    let mut view = ViewState::new(bounds);
    let mut next_snapshot = Instant::now() + SNAPSHOT_INTERVAL;
    loop {
        let wait = next_snapshot.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(Inbound::Data(message)) => view.apply(message),
            Ok(Inbound::Control(message)) => match ctx.on_control(message)? {
                Directive::Terminate => return Ok(WorkerExit::Clean),
                Directive::Resize(bounds) => announce(&mut size, bounds),
                Directive::Regenerate | Directive::Continue => {}
            },
            Ok(Inbound::PeerClosed) => {
                let err = AppError::PeerClosed("relay subscription".into());
                tracing::warn!(error = %err, "object sets frozen");
            }
            Ok(Inbound::SupervisorLost) | Err(RecvTimeoutError::Disconnected) => {
                return Err(AppError::PeerClosed("supervisor control stream".into()));
            }
            Err(RecvTimeoutError::Timeout) => {
                let state = drone.read()?;
                let points = score.read()?;
                tracing::info!(
                    x = state.position.x,
                    y = state.position.y,
                    vx = state.velocity.x,
                    vy = state.velocity.y,
                    score = points.value,
                    obstacles = view.obstacles.len(),
                    targets = view.targets.len(),
                    targets_hit = view.targets.hit_count(),
                    "snapshot"
                );
                if tracing::enabled!(tracing::Level::DEBUG) {
                    tracing::debug!("frame\n{}", view.render(&state, points));
                }
                next_snapshot = Instant::now() + SNAPSHOT_INTERVAL;
            }
        }
    }
}
