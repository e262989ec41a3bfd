//! Process supervisor.
//!
//! Workers are launched one at a time; the next one starts only after the
//! previous one wrote `ready <pid>` on its control stream. Once everyone is
//! up the supervisor pings every worker at a fixed interval and expects a
//! `pong` back within the heartbeat timeout.
//!
//! The group fails together. The first worker exit (whatever the status), a
//! missed heartbeat or a failed startup ends the session: every remaining
//! worker gets `terminate`, stragglers are killed after a grace period and
//! nobody is restarted.

use std::fmt;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use dronesim_core::constants::EXIT_USER_QUIT;
use dronesim_core::control::ControlMessage;
use dronesim_core::enums::Role;
use dronesim_core::settings::WatchdogSettings;

use crate::channel::FrameReader;
use crate::error::AppError;

/// Upper bound on one wait for control traffic.
const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub startup_timeout: Duration,
    pub teardown_grace: Duration,
}

impl SupervisorConfig {
    pub fn from_settings(watchdog: &WatchdogSettings) -> Self {
        Self {
            heartbeat_interval: watchdog.heartbeat_interval(),
            heartbeat_timeout: watchdog.heartbeat_timeout(),
            startup_timeout: watchdog.startup_timeout(),
            teardown_grace: watchdog.teardown_grace(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&WatchdogSettings::default())
    }
}

/// A worker to launch. Stdin and stdout are taken over for the control stream.
#[derive(Debug)]
pub struct WorkerSpec {
    pub role: Role,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Launched,
    Alive,
    /// Exited on its own.
    Dead,
    /// Stopped by the teardown.
    Terminated,
}

#[derive(Debug)]
pub struct ProcessRecord {
    pub pid: u32,
    pub role: Role,
    pub last_heartbeat: Instant,
    pub state: ProcessState,
    child: Child,
    control: Option<ChildStdin>,
    exit: Option<ExitStatus>,
}

impl ProcessRecord {
    fn send(&mut self, message: ControlMessage) -> io::Result<()> {
        let Some(control) = self.control.as_mut() else {
            return Err(io::ErrorKind::BrokenPipe.into());
        };
        writeln!(control, "{}", message.encode())?;
        control.flush()
    }

    fn is_running(&self) -> bool {
        matches!(self.state, ProcessState::Launched | ProcessState::Alive)
    }

    /// Record the exit if the process is gone.
    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        self.exit = status;
        Ok(status)
    }
}

#[derive(Debug)]
enum SupervisorEvent {
    Control { index: usize, message: ControlMessage },
    ControlClosed { index: usize },
    Forward { role: Role, message: ControlMessage },
}

/// Sends control messages to the workers of a running supervisor from
/// another thread. Delivery happens on the supervisor's next wait.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    events: Sender<SupervisorEvent>,
}

impl ControlHandle {
    /// Queue `message` for every running worker of `role`. False once the
    /// supervisor is gone.
    pub fn send_to(&self, role: Role, message: ControlMessage) -> bool {
        self.events
            .send(SupervisorEvent::Forward { role, message })
            .is_ok()
    }
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownCause {
    WorkerExited {
        role: Role,
        pid: u32,
        code: Option<i32>,
    },
    LivenessTimeout {
        role: Role,
        pid: u32,
    },
    StartupFailed {
        role: Role,
        reason: String,
    },
}

impl TeardownCause {
    /// The input relay ended the session on the quit key.
    pub fn is_user_quit(&self) -> bool {
        matches!(
            self,
            TeardownCause::WorkerExited {
                role: Role::Input,
                code: Some(EXIT_USER_QUIT),
                ..
            }
        )
    }
}

impl fmt::Display for TeardownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownCause::WorkerExited {
                role,
                pid,
                code: Some(code),
            } => write!(f, "{role} (pid {pid}) exited with status {code}"),
            TeardownCause::WorkerExited { role, pid, code: None } => {
                write!(f, "{role} (pid {pid}) was killed by a signal")
            }
            TeardownCause::LivenessTimeout { role, pid } => {
                let err = AppError::LivenessTimeout {
                    role: *role,
                    pid: *pid,
                };
                write!(f, "{err}")
            }
            TeardownCause::StartupFailed { role, reason } => {
                write!(f, "{role} failed to start: {reason}")
            }
        }
    }
}

/// How one worker ended during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub role: Role,
    pub pid: u32,
    /// `None` when the process died from a signal.
    pub code: Option<i32>,
    /// Killed after the grace period ran out.
    pub killed: bool,
}

#[derive(Debug)]
pub struct SessionReport {
    pub cause: TeardownCause,
    pub outcomes: Vec<ExitOutcome>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("cannot spawn {role}: {source}")]
    Spawn {
        role: Role,
        #[source]
        source: io::Error,
    },
    #[error("{role} not ready after {timeout:?}")]
    StartupTimeout { role: Role, timeout: Duration },
    #[error("{role} exited before it was ready (status {code:?})")]
    ExitedBeforeReady { role: Role, code: Option<i32> },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct Supervisor {
    config: SupervisorConfig,
    records: Vec<ProcessRecord>,
    events_tx: Sender<SupervisorEvent>,
    events: Receiver<SupervisorEvent>,
    next_ping: Instant,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events_tx, events) = mpsc::channel();
        Self {
            config,
            records: Vec::new(),
            events_tx,
            events,
            next_ping: Instant::now() + config.heartbeat_interval,
        }
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.records
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Send `message` to every ready worker of `role`. Returns how many got it.
    pub fn send_to(&mut self, role: Role, message: ControlMessage) -> usize {
        let mut delivered = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|r| r.role == role && r.state == ProcessState::Alive)
        {
            match record.send(message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    let pid = record.pid;
                    tracing::debug!(%role, pid, error = %err, "control message not delivered");
                }
            }
        }
        delivered
    }

    /// Spawn a worker and wait for its ready line.
    pub fn launch(&mut self, spec: WorkerSpec) -> Result<u32, SupervisorError> {
        let WorkerSpec { role, mut command } = spec;
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn { role, source })?;
        let pid = child.id();
        let control = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout not captured"))?;

        let index = self.records.len();
        self.records.push(ProcessRecord {
            pid,
            role,
            last_heartbeat: Instant::now(),
            state: ProcessState::Launched,
            child,
            control,
            exit: None,
        });
        spawn_control_listener(index, role, stdout, self.events_tx.clone())?;
        tracing::debug!(%role, pid, "worker spawned, waiting for ready");

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if self.records[index].state == ProcessState::Alive {
                return Ok(pid);
            }
            if let Some(status) = self.records[index].poll_exit()? {
                self.records[index].state = ProcessState::Dead;
                return Err(SupervisorError::ExitedBeforeReady {
                    role,
                    code: status.code(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SupervisorError::StartupTimeout {
                    role,
                    timeout: self.config.startup_timeout,
                });
            }
            self.ping_if_due(now);
            self.wait_for_event((deadline - now).min(POLL));
        }
    }

    /// Watch the group until something ends the session.
    pub fn monitor(&mut self) -> TeardownCause {
        loop {
            for record in &mut self.records {
                let status = match record.poll_exit() {
                    Ok(Some(status)) => status.code(),
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(role = %record.role, error = %err, "cannot query worker");
                        None
                    }
                };
                record.state = ProcessState::Dead;
                return TeardownCause::WorkerExited {
                    role: record.role,
                    pid: record.pid,
                    code: status,
                };
            }

            let now = Instant::now();
            self.ping_if_due(now);
            let timeout = self.config.heartbeat_timeout;
            if let Some(record) = self
                .records
                .iter()
                .find(|r| now.duration_since(r.last_heartbeat) > timeout)
            {
                return TeardownCause::LivenessTimeout {
                    role: record.role,
                    pid: record.pid,
                };
            }

            self.wait_for_event(POLL);
        }
    }

    /// Terminate every running worker, newest first, and collect how each
    /// one ended. Workers still running after the grace period are killed.
    pub fn teardown(&mut self) -> Vec<ExitOutcome> {
        for record in self.records.iter_mut().rev() {
            if !record.is_running() {
                continue;
            }
            if let Err(err) = record.send(ControlMessage::Terminate) {
                tracing::debug!(role = %record.role, error = %err, "terminate not delivered");
            }
        }

        let deadline = Instant::now() + self.config.teardown_grace;
        loop {
            let mut pending = 0;
            for record in &mut self.records {
                if !record.is_running() {
                    continue;
                }
                match record.poll_exit() {
                    Ok(Some(_)) => record.state = ProcessState::Terminated,
                    Ok(None) => pending += 1,
                    Err(err) => {
                        tracing::warn!(role = %record.role, error = %err, "cannot query worker");
                        pending += 1;
                    }
                }
            }
            if pending == 0 || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        self.records
            .iter_mut()
            .map(|record| {
                record.control = None;
                let mut killed = false;
                if record.is_running() {
                    let (role, pid) = (record.role, record.pid);
                    tracing::warn!(%role, pid, "grace period over, killing");
                    if let Err(err) = record.child.kill() {
                        tracing::warn!(role = %record.role, error = %err, "kill failed");
                    }
                    record.exit = record.child.wait().ok();
                    record.state = ProcessState::Terminated;
                    killed = true;
                }
                ExitOutcome {
                    role: record.role,
                    pid: record.pid,
                    code: record.exit.and_then(|status| status.code()),
                    killed,
                }
            })
            .collect()
    }

    fn ping_if_due(&mut self, now: Instant) {
        if now < self.next_ping {
            return;
        }
        for record in self.records.iter_mut().filter(|r| r.state == ProcessState::Alive) {
            if let Err(err) = record.send(ControlMessage::Ping) {
                tracing::debug!(role = %record.role, error = %err, "ping not delivered");
            }
        }
        self.next_ping = now + self.config.heartbeat_interval;
    }

    fn wait_for_event(&mut self, wait: Duration) {
        match self.events.recv_timeout(wait) {
            Ok(event) => self.handle_event(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Control { index, message } => {
                let record = &mut self.records[index];
                match message {
                    ControlMessage::Ready { pid } | ControlMessage::Pong { pid } => {
                        if pid != record.pid {
                            let (role, expected) = (record.role, record.pid);
                            tracing::warn!(%role, expected, pid, "reply from unexpected pid");
                        }
                        record.last_heartbeat = Instant::now();
                        if matches!(message, ControlMessage::Ready { .. }) {
                            record.state = ProcessState::Alive;
                            tracing::info!(role = %record.role, pid = record.pid, "worker ready");
                        }
                    }
                    other => {
                        let (role, message) = (record.role, other.encode());
                        tracing::warn!(%role, %message, "unexpected control message");
                    }
                }
            }
            SupervisorEvent::ControlClosed { index } => {
                let record = &self.records[index];
                tracing::debug!(role = %record.role, pid = record.pid, "control stream closed");
            }
            SupervisorEvent::Forward { role, message } => {
                let delivered = self.send_to(role, message);
                tracing::debug!(%role, message = %message.encode(), delivered, "forwarded");
            }
        }
    }
}

fn spawn_control_listener<R>(
    index: usize,
    role: Role,
    output: R,
    events: Sender<SupervisorEvent>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: io::Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("dronesim-watch-{role}"))
        .spawn(move || {
            let mut lines = FrameReader::new(output);
            loop {
                let line = match lines.next_record() {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(%role, error = %err, "dropping control line");
                        continue;
                    }
                    Err(err) => {
                        tracing::debug!(%role, error = %err, "control stream read failed");
                        break;
                    }
                };
                match ControlMessage::decode(&line) {
                    Ok(message) => {
                        if events.send(SupervisorEvent::Control { index, message }).is_err() {
                            return;
                        }
                    }
                    Err(err) => tracing::warn!(%role, error = %err, "dropping control line"),
                }
            }
            let _ = events.send(SupervisorEvent::ControlClosed { index });
        })
}

/// Launch `specs` in order, watch them, tear everything down.
pub fn supervise(config: SupervisorConfig, specs: Vec<WorkerSpec>) -> SessionReport {
    run_session(Supervisor::new(config), specs)
}

/// Run a whole session with `supervisor`. Take a [`ControlHandle`] from it
/// first to talk to the workers while the session runs.
pub fn run_session(mut supervisor: Supervisor, specs: Vec<WorkerSpec>) -> SessionReport {
    let mut startup_failure = None;
    for spec in specs {
        let role = spec.role;
        match supervisor.launch(spec) {
            Ok(pid) => tracing::debug!(%role, pid, "worker launched"),
            Err(err) => {
                tracing::error!(%role, error = %err, "startup failed");
                startup_failure = Some(TeardownCause::StartupFailed {
                    role,
                    reason: err.to_string(),
                });
                break;
            }
        }
    }

    let cause = match startup_failure {
        Some(cause) => cause,
        None => {
            tracing::info!(workers = supervisor.records().len(), "group up");
            supervisor.monitor()
        }
    };
    if cause.is_user_quit() {
        tracing::info!(%cause, "tearing the group down");
    } else {
        tracing::error!(%cause, "tearing the group down");
    }

    let outcomes = supervisor.teardown();
    for outcome in &outcomes {
        tracing::debug!(?outcome, "worker ended");
    }
    SessionReport { cause, outcomes }
}
