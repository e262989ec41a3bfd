//! Message relay.
//!
//! The router owns the shared state and the relay socket. Producers push
//! records on their channel; the router validates each record and fans it
//! out to every consumer subscribed to that channel, in arrival order.
//! Nothing is promised across channels.
//!
//! The main loop waits on one merged queue with a bounded timeout. Accepted
//! connections, producer records and control messages all arrive there. A
//! producer hanging up only disables that path. Losing the control stream
//! means the supervisor is gone: every subscriber stream is closed and the
//! router exits with an error.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use dronesim_core::constants::{ROUTER_WAIT_MS, SUBSCRIBER_WRITE_TIMEOUT_MS};
use dronesim_core::enums::{ChannelId, Consumer};
use dronesim_core::types::Score;
use dronesim_core::wire::WireMessage;
use dronesim_core::ProtocolError;

use crate::channel::{encode_routed, FrameReader, FrameWriter, Handshake};
use crate::error::AppError;
use crate::shared_state::SharedRegion;
use crate::worker::{spawn_control_reader, Directive, Inbound, WorkerContext, WorkerExit};

/// Traffic produced by the socket side of the router.
#[derive(Debug)]
pub enum RelayInput {
    Subscribe(Consumer, UnixStream),
    Record(ChannelId, String),
    ProducerClosed(ChannelId),
}

pub type RouterEvent = Inbound<RelayInput>;

struct Subscriber {
    consumer: Consumer,
    writer: FrameWriter<Box<dyn Write + Send>>,
}

/// Routing state: subscribers and the latest value of every stateful channel.
#[derive(Default)]
pub struct Router {
    subscribers: Vec<Subscriber>,
    latest: HashMap<ChannelId, String>,
    relayed: u64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer stream and replay the latest stateful records it
    /// is subscribed to. Returns false when the stream already failed.
    pub fn subscribe(&mut self, consumer: Consumer, out: Box<dyn Write + Send>) -> bool {
        let mut subscriber = Subscriber {
            consumer,
            writer: FrameWriter::new(out),
        };
        for channel in consumer.subscriptions() {
            let Some(record) = self.latest.get(&channel) else {
                continue;
            };
            if let Err(err) = subscriber.writer.send(&encode_routed(channel, record)) {
                tracing::warn!(%consumer, error = %err, "subscriber failed during replay");
                return false;
            }
        }
        tracing::info!(%consumer, "subscriber attached");
        self.subscribers.push(subscriber);
        true
    }

    /// Validate `record` and forward it to every subscriber of `channel`.
    /// Returns how many subscribers received it. A malformed record is
    /// rejected before anyone sees it.
    pub fn relay(&mut self, channel: ChannelId, record: &str) -> Result<usize, ProtocolError> {
        WireMessage::decode(channel, record)?;

        let line = encode_routed(channel, record);
        let targets = channel.consumers();
        let mut delivered = 0;
        self.subscribers.retain_mut(|subscriber| {
            if !targets.contains(&subscriber.consumer) {
                return true;
            }
            match subscriber.writer.send(&line) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(err) => {
                    let err = AppError::PeerClosed(format!("{} ({err})", subscriber.consumer));
                    tracing::warn!(error = %err, "dropping subscriber");
                    false
                }
            }
        });

        if channel.is_stateful() {
            self.latest.insert(channel, record.to_string());
        }
        self.relayed += 1;
        Ok(delivered)
    }

    /// Close every subscriber stream. Consumers see end of stream.
    pub fn close_all(&mut self) -> usize {
        let closed = self.subscribers.len();
        self.subscribers.clear();
        closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn latest(&self, channel: ChannelId) -> Option<&str> {
        self.latest.get(&channel).map(String::as_str)
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }
}

/// Bind the relay socket, replacing a stale one.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    UnixListener::bind(path)
}

/// Accept connections forever, one handler thread per connection.
pub fn spawn_acceptor(
    listener: UnixListener,
    events: Sender<RouterEvent>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("dronesim-router-accept".into())
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let events = events.clone();
                        let spawned = thread::Builder::new()
                            .name("dronesim-router-conn".into())
                            .spawn(move || handle_connection(stream, events));
                        if let Err(err) = spawned {
                            tracing::warn!(error = %err, "cannot spawn connection handler");
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                }
            }
        })
}

fn handle_connection(stream: UnixStream, events: Sender<RouterEvent>) {
    let read_half = match stream.try_clone() {
        Ok(read_half) => read_half,
        Err(err) => {
            tracing::warn!(error = %err, "cannot clone connection");
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => return,
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(error = %err, "handshake read failed");
            return;
        }
    }

    match Handshake::decode(&line) {
        Ok(Handshake::Consume(consumer)) => {
            let timeout = Duration::from_millis(SUBSCRIBER_WRITE_TIMEOUT_MS);
            if let Err(err) = stream.set_write_timeout(Some(timeout)) {
                tracing::warn!(%consumer, error = %err, "cannot set write timeout");
            }
            let _ = events.send(Inbound::Data(RelayInput::Subscribe(consumer, stream)));
        }
        Ok(Handshake::Produce(channel)) => {
            tracing::info!(%channel, "producer attached");
            let mut frames = FrameReader::from_buffered(reader);
            loop {
                match frames.next_record() {
                    Ok(Some(record)) => {
                        if events
                            .send(Inbound::Data(RelayInput::Record(channel, record)))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(%channel, error = %err, "record dropped");
                    }
                    Err(err) => {
                        tracing::warn!(%channel, error = %err, "producer read failed");
                        break;
                    }
                }
            }
            let _ = events.send(Inbound::Data(RelayInput::ProducerClosed(channel)));
        }
        Err(err) => tracing::warn!(error = %err, "rejecting connection"),
    }
}

/// Relay until terminated. Returns an error when the supervisor is lost.
pub fn serve(
    router: &mut Router,
    events: &Receiver<RouterEvent>,
    ctx: &mut WorkerContext,
    wait: Duration,
) -> Result<(), AppError> {
    loop {
        match events.recv_timeout(wait) {
            Ok(Inbound::Data(RelayInput::Record(channel, record))) => {
                match router.relay(channel, &record) {
                    Ok(delivered) => tracing::trace!(%channel, delivered, "relayed"),
                    Err(source) => {
                        let err = AppError::ProtocolViolation {
                            context: format!("{channel} channel"),
                            source,
                        };
                        tracing::warn!(error = %err, record = %record, "record dropped");
                    }
                }
            }
            Ok(Inbound::Data(RelayInput::Subscribe(consumer, stream))) => {
                router.subscribe(consumer, Box::new(stream));
            }
            Ok(Inbound::Data(RelayInput::ProducerClosed(channel))) => {
                let err = AppError::PeerClosed(format!("{channel} producer"));
                tracing::warn!(error = %err, "relay path disabled");
            }
            Ok(Inbound::Control(message)) => match ctx.on_control(message) {
                Ok(Directive::Terminate) => {
                    let closed = router.close_all();
                    tracing::info!(closed, relayed = router.relayed(), "relay shut down");
                    return Ok(());
                }
                Ok(directive) => tracing::trace!(?directive, "control handled"),
                Err(err) => {
                    router.close_all();
                    return Err(err);
                }
            },
            Ok(Inbound::SupervisorLost) | Err(RecvTimeoutError::Disconnected) => {
                let closed = router.close_all();
                tracing::error!(closed, "supervisor lost, tearing the relay down");
                return Err(AppError::PeerClosed("supervisor control stream".into()));
            }
            Ok(Inbound::PeerClosed) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::trace!(subscribers = router.subscriber_count(), "relay idle");
            }
        }
    }
}

/// Router process: create the shared state, open the socket, relay.
pub fn run(ctx: &mut WorkerContext) -> Result<WorkerExit, AppError> {
    let regions = ctx.paths.regions();
    let mode = ctx.shm_mode();
    let drone = SharedRegion::create(
        &regions.drone,
        ctx.settings.drone_initial_position.to_state(),
        mode,
    )?;
    let score = SharedRegion::create(&regions.score, Score::default(), mode)?;

    let socket = ctx.paths.socket_path();
    let listener = bind(&socket).map_err(|e| {
        AppError::ResourceUnavailable(format!("relay socket {}: {e}", socket.display()))
    })?;

    let (tx, rx) = mpsc::channel();
    spawn_acceptor(listener, tx.clone())
        .map_err(|e| AppError::ResourceUnavailable(format!("acceptor thread: {e}")))?;
    spawn_control_reader(io::stdin(), tx)
        .map_err(|e| AppError::ResourceUnavailable(format!("control thread: {e}")))?;

    tracing::info!(
        drone = drone.name(),
        score = score.name(),
        socket = %socket.display(),
        ?mode,
        "relay up"
    );
    ctx.announce_ready()?;

    let mut router = Router::new();
    let result = serve(&mut router, &rx, ctx, Duration::from_millis(ROUTER_WAIT_MS));

    if let Err(err) = fs::remove_file(&socket) {
        tracing::warn!(error = %err, "cannot remove relay socket");
    }
    // Dropping the owner handles unlinks both regions.
    drop(drone);
    drop(score);
    result.map(|()| WorkerExit::Clean)
}
