//! Generator process: publishes a fresh object set every period.
//!
//! A set is also published right away when the bounds change and when the
//! supervisor asks for a regeneration. Each publish is one complete counted
//! record, so consumers swap whole sets.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

use dronesim_core::enums::{ChannelId, Consumer, ObjectKind};
use dronesim_core::types::GameBounds;
use dronesim_core::wire::WireMessage;
use dronesim_sim::{GenerateError, ObjectGenerator};

use crate::channel::Producer;
use crate::error::AppError;
use crate::worker::{
    spawn_control_reader, spawn_subscription_reader, Directive, Inbound, WorkerContext, WorkerExit,
};

/// Seed for `kind`. A configured seed is offset per kind so both generators
/// stay reproducible without drawing the same cells.
pub fn seed_for(kind: ObjectKind, configured: Option<u64>) -> u64 {
    match configured {
        Some(seed) => match kind {
            ObjectKind::Obstacle => seed,
            ObjectKind::Target => seed.wrapping_add(1),
        },
        None => rand::random(),
    }
}

pub struct GeneratorLoop {
    generator: ObjectGenerator,
    producer: Option<Producer>,
    published: u64,
}

impl GeneratorLoop {
    pub fn new(generator: ObjectGenerator, producer: Producer) -> Self {
        Self {
            generator,
            producer: Some(producer),
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Adopt `bounds`. Returns whether they differ from the current ones.
    pub fn resize(&mut self, bounds: GameBounds) -> bool {
        let changed = self.generator.bounds() != Some(bounds);
        self.generator.set_bounds(bounds);
        changed
    }

    /// Draw and publish one set. Only an allocation failure is fatal.
    pub fn publish(&mut self) -> Result<bool, AppError> {
        let kind = self.generator.kind();
        let set = match self.generator.generate() {
            Ok(set) => set,
            Err(GenerateError::Allocation { count }) => {
                return Err(AppError::AllocationFailure(format!("{count} {kind}s")));
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping generation");
                return Ok(false);
            }
        };

        let Some(producer) = self.producer.as_mut() else {
            tracing::debug!("relay path disabled, set not published");
            return Ok(false);
        };
        let count = set.len();
        if let Err(err) = producer.publish(&WireMessage::Objects(set)) {
            let err = AppError::PeerClosed(format!("{} producer ({err})", producer.channel()));
            tracing::warn!(error = %err, "relay path disabled");
            self.producer = None;
            return Ok(false);
        }
        self.published += 1;
        tracing::info!(%kind, count, published = self.published, "set published");
        Ok(true)
    }
}

pub fn run(ctx: &mut WorkerContext, kind: ObjectKind) -> Result<WorkerExit, AppError> {
    let settings = &ctx.settings;
    let count = match kind {
        ObjectKind::Obstacle => settings.num_obstacles,
        ObjectKind::Target => settings.num_targets,
    };
    let period = settings.generator.period();
    let seed = seed_for(kind, settings.generator.seed);
    let bounds = settings
        .bounds()
        .map_err(|e| AppError::ResourceUnavailable(format!("settings: {e}")))?;
    tracing::debug!(%kind, count, seed, ?period, "generator configured");

    let mut generator = ObjectGenerator::new(kind, count, seed);
    generator.set_bounds(bounds);
    let producer = ctx.producer(ChannelId::for_kind(kind))?;
    let mut worker = GeneratorLoop::new(generator, producer);

    let (tx, rx) = mpsc::channel();
    let subscription = ctx.subscription(Consumer::for_generator(kind))?;
    spawn_subscription_reader(subscription, tx.clone())
        .map_err(|e| AppError::ResourceUnavailable(format!("relay thread: {e}")))?;
    spawn_control_reader(io::stdin(), tx)
        .map_err(|e| AppError::ResourceUnavailable(format!("control thread: {e}")))?;

    ctx.announce_ready()?;

    worker.publish()?;
    let mut next_due = Instant::now() + period;
    loop {
        let wait = next_due.saturating_duration_since(Instant::now());
        let regenerate = match rx.recv_timeout(wait) {
            Ok(Inbound::Data(WireMessage::Resize(bounds))) => {
                tracing::debug!(width = bounds.width(), height = bounds.height(), "resize");
                worker.resize(bounds)
            }
            Ok(Inbound::Data(_)) => false,
            Ok(Inbound::Control(message)) => match ctx.on_control(message)? {
                Directive::Terminate => {
                    tracing::info!(published = worker.published(), "generator stopped");
                    return Ok(WorkerExit::Clean);
                }
                Directive::Regenerate => true,
                Directive::Resize(bounds) => worker.resize(bounds),
                Directive::Continue => false,
            },
            Ok(Inbound::PeerClosed) => {
                let err = AppError::PeerClosed("relay subscription".into());
                tracing::warn!(error = %err, "bounds will no longer follow resizes");
                false
            }
            Ok(Inbound::SupervisorLost) | Err(RecvTimeoutError::Disconnected) => {
                return Err(AppError::PeerClosed("supervisor control stream".into()));
            }
            Err(RecvTimeoutError::Timeout) => true,
        };

        if regenerate {
            worker.publish()?;
            next_due = Instant::now() + period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FrameReader, Handshake};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::time::Duration;

    fn producer_pair(channel: ChannelId) -> (tempfile::TempDir, Producer, FrameReader<UnixStream>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let producer = Producer::connect(&path, channel, 1, Duration::from_millis(1)).unwrap();
        let (stream, _) = listener.accept().unwrap();
        (dir, producer, FrameReader::new(stream))
    }

    #[test]
    fn test_configured_seed_differs_per_kind() {
        assert_eq!(seed_for(ObjectKind::Obstacle, Some(7)), 7);
        assert_eq!(seed_for(ObjectKind::Target, Some(7)), 8);
        assert_eq!(seed_for(ObjectKind::Target, Some(u64::MAX)), 0);
    }

    #[test]
    fn test_publish_sends_one_counted_record() {
        let (_dir, producer, mut reader) = producer_pair(ChannelId::Targets);
        let mut generator = ObjectGenerator::new(ObjectKind::Target, 5, 42);
        generator.set_bounds(GameBounds::new(120, 40).unwrap());
        let mut worker = GeneratorLoop::new(generator, producer);

        assert!(worker.publish().unwrap());
        assert_eq!(worker.published(), 1);

        let handshake = reader.next_record().unwrap().unwrap();
        assert_eq!(
            Handshake::decode(&handshake).unwrap(),
            Handshake::Produce(ChannelId::Targets)
        );
        let record = reader.next_record().unwrap().unwrap();
        assert!(record.starts_with("5:"));
        match WireMessage::decode(ChannelId::Targets, &record).unwrap() {
            WireMessage::Objects(set) => {
                assert_eq!(set.len(), 5);
                assert!(set.iter().all(|o| (1..=118).contains(&o.x) && (1..=38).contains(&o.y)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tiny_map_skips_without_failing() {
        let (_dir, producer, _reader) = producer_pair(ChannelId::Obstacles);
        let mut generator = ObjectGenerator::new(ObjectKind::Obstacle, 3, 1);
        generator.set_bounds(GameBounds::new(2, 2).unwrap());
        let mut worker = GeneratorLoop::new(generator, producer);
        assert!(!worker.publish().unwrap());
        assert_eq!(worker.published(), 0);
    }

    #[test]
    fn test_allocation_failure_is_fatal() {
        let (_dir, producer, _reader) = producer_pair(ChannelId::Obstacles);
        let mut generator = ObjectGenerator::new(ObjectKind::Obstacle, usize::MAX, 1);
        generator.set_bounds(GameBounds::new(120, 40).unwrap());
        let mut worker = GeneratorLoop::new(generator, producer);
        assert!(matches!(worker.publish(), Err(AppError::AllocationFailure(_))));
    }

    #[test]
    fn test_closed_relay_disables_the_path() {
        let (_dir, producer, reader) = producer_pair(ChannelId::Obstacles);
        drop(reader);
        let mut generator = ObjectGenerator::new(ObjectKind::Obstacle, 200, 1);
        generator.set_bounds(GameBounds::new(120, 40).unwrap());
        let mut worker = GeneratorLoop::new(generator, producer);

        // The first write may still land in the socket buffer.
        let mut delivered = 0;
        for _ in 0..4 {
            if worker.publish().unwrap() {
                delivered += 1;
            }
        }
        assert!(delivered < 4);
        assert!(!worker.publish().unwrap());
    }

    #[test]
    fn test_resize_reports_changes_only() {
        let (_dir, producer, _reader) = producer_pair(ChannelId::Obstacles);
        let mut generator = ObjectGenerator::new(ObjectKind::Obstacle, 1, 1);
        generator.set_bounds(GameBounds::new(120, 40).unwrap());
        let mut worker = GeneratorLoop::new(generator, producer);
        assert!(!worker.resize(GameBounds::new(120, 40).unwrap()));
        assert!(worker.resize(GameBounds::new(80, 24).unwrap()));
    }
}
