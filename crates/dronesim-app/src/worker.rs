//! Per-process context shared by every worker role.
//!
//! A worker owns one merged event queue. Background reader threads feed it
//! from the control stream (stdin, supervisor to worker) and from the
//! worker's relay subscription; the worker's main loop is the only place
//! that acts on either. Replies to the supervisor go out on stdout.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use dronesim_core::constants::{
    CONNECT_ATTEMPTS, CONNECT_BACKOFF_MS, SHM_OPEN_ATTEMPTS, SHM_OPEN_BACKOFF_MS,
};
use dronesim_core::control::ControlMessage;
use dronesim_core::enums::{ChannelId, Consumer, Role, SharedStateMode};
use dronesim_core::settings::{Settings, SettingsError};
use dronesim_core::types::GameBounds;
use dronesim_core::wire::WireMessage;

use crate::channel::{FrameReader, Producer, Subscription, ROUTER_SOCKET};
use crate::error::AppError;
use crate::shared_state::{Access, RegionNames, SharedRegion};

/// Event delivered to a worker's main loop.
#[derive(Debug)]
pub enum Inbound<T> {
    Control(ControlMessage),
    /// The control stream hit end of file: the supervisor is gone.
    SupervisorLost,
    Data(T),
    /// The data source closed its stream.
    PeerClosed,
}

/// What the main loop should do after a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Terminate,
    Regenerate,
    Resize(GameBounds),
}

/// How a worker ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Through the terminate protocol.
    Clean,
    /// The input relay saw the quit key.
    UserQuit,
}

/// Locations shared by every process of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl RunPaths {
    pub fn socket_path(&self) -> PathBuf {
        self.run_dir.join(ROUTER_SOCKET)
    }

    pub fn regions(&self) -> RegionNames {
        RegionNames::for_run(&self.run_id)
    }
}

/// Worker-to-supervisor half of the control stream.
pub struct ControlSender {
    out: Box<dyn Write + Send>,
}

impl ControlSender {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn send(&mut self, message: ControlMessage) -> io::Result<()> {
        writeln!(self.out, "{}", message.encode())?;
        self.out.flush()
    }
}

pub struct WorkerContext {
    pub role: Role,
    pub settings: Settings,
    pub paths: RunPaths,
    control: ControlSender,
    pid: u32,
}

impl WorkerContext {
    pub fn new(role: Role, settings: Settings, paths: RunPaths, control: ControlSender) -> Self {
        Self {
            role,
            settings,
            paths,
            control,
            pid: std::process::id(),
        }
    }

    pub fn shm_mode(&self) -> SharedStateMode {
        self.settings.shared_state
    }

    /// Tell the supervisor initialisation is over.
    pub fn announce_ready(&mut self) -> Result<(), AppError> {
        self.send(ControlMessage::Ready { pid: self.pid })?;
        tracing::info!(pid = self.pid, "ready");
        Ok(())
    }

    /// Answer heartbeats here; everything else becomes a directive.
    pub fn on_control(&mut self, message: ControlMessage) -> Result<Directive, AppError> {
        match message {
            ControlMessage::Ping => {
                self.send(ControlMessage::Pong { pid: self.pid })?;
                Ok(Directive::Continue)
            }
            ControlMessage::Terminate => {
                tracing::info!("terminate received");
                Ok(Directive::Terminate)
            }
            ControlMessage::Regenerate => Ok(Directive::Regenerate),
            ControlMessage::Resize(bounds) => Ok(Directive::Resize(bounds)),
            ControlMessage::Pong { .. } | ControlMessage::Ready { .. } => {
                tracing::warn!(message = %message.encode(), "unexpected control message");
                Ok(Directive::Continue)
            }
        }
    }

    fn send(&mut self, message: ControlMessage) -> Result<(), AppError> {
        self.control
            .send(message)
            .map_err(|e| AppError::PeerClosed(format!("control stream: {e}")))
    }

    pub fn open_region<T: bytemuck::Pod>(
        &self,
        name: &str,
        access: Access,
    ) -> Result<SharedRegion<T>, AppError> {
        Ok(SharedRegion::open_with_retry(
            name,
            access,
            self.shm_mode(),
            SHM_OPEN_ATTEMPTS,
            Duration::from_millis(SHM_OPEN_BACKOFF_MS),
        )?)
    }

    pub fn producer(&self, channel: ChannelId) -> Result<Producer, AppError> {
        Ok(Producer::connect(
            &self.paths.socket_path(),
            channel,
            CONNECT_ATTEMPTS,
            Duration::from_millis(CONNECT_BACKOFF_MS),
        )?)
    }

    pub fn subscription(&self, consumer: Consumer) -> Result<Subscription, AppError> {
        Ok(Subscription::connect(
            &self.paths.socket_path(),
            consumer,
            CONNECT_ATTEMPTS,
            Duration::from_millis(CONNECT_BACKOFF_MS),
        )?)
    }
}

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    match Settings::load(path) {
        Err(err) if err.is_not_found() => {
            tracing::warn!(path = %path.display(), "settings file not found, using defaults");
            Ok(Settings::default())
        }
        other => other,
    }
}

/// Feed control lines from `input` into `events`. Messages queue up, so one
/// arriving while the previous one is handled just waits its turn.
pub fn spawn_control_reader<R, T>(
    input: R,
    events: Sender<Inbound<T>>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name("dronesim-control".into())
        .spawn(move || {
            let mut lines = FrameReader::new(input);
            loop {
                let line = match lines.next_record() {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(error = %err, "dropping control line");
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "control stream read failed");
                        break;
                    }
                };
                match ControlMessage::decode(&line) {
                    Ok(message) => {
                        if events.send(Inbound::Control(message)).is_err() {
                            return;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "dropping control line"),
                }
            }
            let _ = events.send(Inbound::SupervisorLost);
        })
}

/// Feed relay messages from `subscription` into `events`.
pub fn spawn_subscription_reader(
    mut subscription: Subscription,
    events: Sender<Inbound<WireMessage>>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("dronesim-{}-relay", subscription.consumer()))
        .spawn(move || {
            loop {
                match subscription.recv() {
                    Ok(Some(message)) => {
                        if events.send(Inbound::Data(message)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(error = %err, "protocol violation, record dropped");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "relay stream failed");
                        break;
                    }
                }
            }
            let _ = events.send(Inbound::PeerClosed);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn context(sink: SharedSink) -> WorkerContext {
        let paths = RunPaths {
            run_id: "test".into(),
            run_dir: PathBuf::from("/tmp/dronesim-test"),
            log_dir: PathBuf::from("/tmp/dronesim-test/logs"),
        };
        WorkerContext::new(
            Role::Physics,
            Settings::default(),
            paths,
            ControlSender::new(Box::new(sink)),
        )
    }

    #[test]
    fn test_ping_is_answered_with_pid() {
        let sink = SharedSink::default();
        let mut ctx = context(sink.clone());
        assert_eq!(ctx.on_control(ControlMessage::Ping).unwrap(), Directive::Continue);
        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("pong {}\n", std::process::id()));
    }

    #[test]
    fn test_ready_announcement() {
        let sink = SharedSink::default();
        let mut ctx = context(sink.clone());
        ctx.announce_ready().unwrap();
        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("ready {}\n", std::process::id()));
    }

    #[test]
    fn test_directives() {
        let mut ctx = context(SharedSink::default());
        let bounds = GameBounds::new(80, 24).unwrap();
        assert_eq!(
            ctx.on_control(ControlMessage::Terminate).unwrap(),
            Directive::Terminate
        );
        assert_eq!(
            ctx.on_control(ControlMessage::Regenerate).unwrap(),
            Directive::Regenerate
        );
        assert_eq!(
            ctx.on_control(ControlMessage::Resize(bounds)).unwrap(),
            Directive::Resize(bounds)
        );
        assert_eq!(
            ctx.on_control(ControlMessage::Pong { pid: 1 }).unwrap(),
            Directive::Continue
        );
    }

    #[test]
    fn test_control_reader_queues_and_reports_eof() {
        let (tx, rx) = mpsc::channel::<Inbound<()>>();
        let input = Cursor::new(b"ping\nbogus\nregenerate\nterminate\n".to_vec());
        spawn_control_reader(input, tx).unwrap().join().unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], Inbound::Control(ControlMessage::Ping)));
        assert!(matches!(events[1], Inbound::Control(ControlMessage::Regenerate)));
        assert!(matches!(events[2], Inbound::Control(ControlMessage::Terminate)));
        assert!(matches!(events[3], Inbound::SupervisorLost));
    }

    #[test]
    fn test_control_reader_survives_invalid_utf8() {
        let (tx, rx) = mpsc::channel::<Inbound<()>>();
        let input = Cursor::new(b"ping\n\xc3\x28\nterminate\n".to_vec());
        spawn_control_reader(input, tx).unwrap().join().unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Inbound::Control(ControlMessage::Ping)));
        assert!(matches!(events[1], Inbound::Control(ControlMessage::Terminate)));
        assert!(matches!(events[2], Inbound::SupervisorLost));
    }

    #[test]
    fn test_missing_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("appsettings.json")).unwrap();
        assert_eq!(settings, Settings::default());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ nope").unwrap();
        assert!(load_settings(&bad).is_err());
    }

    #[test]
    fn test_run_paths() {
        let ctx = context(SharedSink::default());
        assert_eq!(
            ctx.paths.socket_path(),
            PathBuf::from("/tmp/dronesim-test/router.sock")
        );
        assert_eq!(ctx.paths.regions().drone, "/dronesim-test-drone");
    }
}
