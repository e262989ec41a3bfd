//! Input relay: key bytes from the controlling terminal to the key channel.
//!
//! The terminal is switched to non-canonical, no-echo mode for the life of
//! the process and restored on the way out. The quit key (or Ctrl-C) ends
//! the session from here. Every other printable byte is published as is
//! and mapped to a command by the physics process. With `--headless` there is no terminal:
//! the relay only answers the control stream.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::mpsc::{self, Sender};
use std::thread;

use dronesim_core::commands::KeyCommand;
use dronesim_core::enums::ChannelId;
use dronesim_core::wire::WireMessage;

use crate::channel::Producer;
use crate::error::AppError;
use crate::worker::{spawn_control_reader, Directive, Inbound, WorkerContext, WorkerExit};

const TTY_PATH: &str = "/dev/tty";

/// Ctrl-C. Signal generation is off in raw mode, so it arrives as a byte.
const INTERRUPT: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Publish(u8),
    Quit,
    Ignore,
}

pub fn classify(byte: u8) -> KeyAction {
    if byte == INTERRUPT {
        return KeyAction::Quit;
    }
    if !byte.is_ascii_graphic() {
        return KeyAction::Ignore;
    }
    match KeyCommand::from_key(byte) {
        Some(KeyCommand::Quit) => KeyAction::Quit,
        _ => KeyAction::Publish(byte),
    }
}

/// Restores the saved terminal attributes on drop.
struct RawTerminal {
    fd: RawFd,
    saved: libc::termios,
}

impl RawTerminal {
    fn enable(fd: RawFd) -> io::Result<Self> {
        // SAFETY: termios is plain old data and tcgetattr fills it in.
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut raw = saved;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ISIG);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd, saved })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) } != 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "cannot restore terminal");
        }
    }
}

fn spawn_key_reader<R>(
    mut input: R,
    events: Sender<Inbound<u8>>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("dronesim-keys".into())
        .spawn(move || {
            let mut byte = [0u8; 1];
            loop {
                match input.read(&mut byte) {
                    Ok(0) => break,
                    Ok(_) => {
                        if events.send(Inbound::Data(byte[0])).is_err() {
                            return;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "terminal read failed");
                        break;
                    }
                }
            }
            let _ = events.send(Inbound::PeerClosed);
        })
}

/// Relay keys until quit or terminate.
pub fn serve(
    events: &mpsc::Receiver<Inbound<u8>>,
    producer: &mut Option<Producer>,
    ctx: &mut WorkerContext,
) -> Result<WorkerExit, AppError> {
    loop {
        let event = events
            .recv()
            .map_err(|_| AppError::PeerClosed("supervisor control stream".into()))?;
        match event {
            Inbound::Data(byte) => match classify(byte) {
                KeyAction::Quit => {
                    tracing::info!("quit key pressed");
                    return Ok(WorkerExit::UserQuit);
                }
                KeyAction::Publish(key) => {
                    let Some(out) = producer.as_mut() else {
                        continue;
                    };
                    if let Err(err) = out.publish(&WireMessage::Key(key)) {
                        let err = AppError::PeerClosed(format!("key producer ({err})"));
                        tracing::warn!(error = %err, "relay path disabled");
                        *producer = None;
                    }
                }
                KeyAction::Ignore => tracing::trace!(byte, "ignored key"),
            },
            Inbound::Control(message) => {
                if ctx.on_control(message)? == Directive::Terminate {
                    return Ok(WorkerExit::Clean);
                }
            }
            Inbound::PeerClosed => tracing::warn!("terminal closed, keys no longer relayed"),
            Inbound::SupervisorLost => {
                return Err(AppError::PeerClosed("supervisor control stream".into()));
            }
        }
    }
}

pub fn run(ctx: &mut WorkerContext, headless: bool) -> Result<WorkerExit, AppError> {
    let (tx, rx) = mpsc::channel();

    if headless {
        spawn_control_reader(io::stdin(), tx)
            .map_err(|e| AppError::ResourceUnavailable(format!("control thread: {e}")))?;
        ctx.announce_ready()?;
        tracing::info!("headless, no keys relayed");
        return serve(&rx, &mut None, ctx);
    }

    let tty = File::open(TTY_PATH)
        .map_err(|e| AppError::ResourceUnavailable(format!("{TTY_PATH}: {e}")))?;
    let _raw = RawTerminal::enable(tty.as_raw_fd())
        .map_err(|e| AppError::ResourceUnavailable(format!("{TTY_PATH} raw mode: {e}")))?;
    let mut producer = Some(ctx.producer(ChannelId::Key)?);

    spawn_key_reader(tty, tx.clone())
        .map_err(|e| AppError::ResourceUnavailable(format!("key thread: {e}")))?;
    spawn_control_reader(io::stdin(), tx)
        .map_err(|e| AppError::ResourceUnavailable(format!("control thread: {e}")))?;

    ctx.announce_ready()?;
    serve(&rx, &mut producer, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{ControlSender, RunPaths};
    use dronesim_core::control::ControlMessage;
    use dronesim_core::enums::Role;
    use dronesim_core::settings::Settings;
    use std::io::Cursor;

    fn context() -> WorkerContext {
        let paths = RunPaths {
            run_id: "input-test".into(),
            run_dir: std::env::temp_dir(),
            log_dir: std::env::temp_dir(),
        };
        WorkerContext::new(
            Role::Input,
            Settings::default(),
            paths,
            ControlSender::new(Box::new(io::sink())),
        )
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(b'w'), KeyAction::Publish(b'w'));
        assert_eq!(classify(b'Z'), KeyAction::Publish(b'Z'));
        assert_eq!(classify(b'p'), KeyAction::Quit);
        assert_eq!(classify(b'P'), KeyAction::Quit);
        assert_eq!(classify(b' '), KeyAction::Ignore);
        assert_eq!(classify(b'\n'), KeyAction::Ignore);
        assert_eq!(classify(0x1b), KeyAction::Ignore);
        assert_eq!(classify(0x03), KeyAction::Quit);
    }

    #[test]
    fn test_key_reader_ends_with_peer_closed() {
        let (tx, rx) = mpsc::channel();
        spawn_key_reader(Cursor::new(b"wd".to_vec()), tx)
            .unwrap()
            .join()
            .unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(
            events.as_slice(),
            [Inbound::Data(b'w'), Inbound::Data(b'd'), Inbound::PeerClosed]
        ));
    }

    #[test]
    fn test_quit_key_ends_the_session() {
        let (tx, rx) = mpsc::channel();
        tx.send(Inbound::Data(b'w')).unwrap();
        tx.send(Inbound::Data(b'p')).unwrap();
        let exit = serve(&rx, &mut None, &mut context()).unwrap();
        assert_eq!(exit, WorkerExit::UserQuit);
    }

    #[test]
    fn test_terminate_is_clean_and_lost_supervisor_is_not() {
        let (tx, rx) = mpsc::channel();
        tx.send(Inbound::PeerClosed).unwrap();
        tx.send(Inbound::Control(ControlMessage::Ping)).unwrap();
        tx.send(Inbound::Control(ControlMessage::Terminate)).unwrap();
        assert_eq!(serve(&rx, &mut None, &mut context()).unwrap(), WorkerExit::Clean);

        let (tx, rx) = mpsc::channel::<Inbound<u8>>();
        tx.send(Inbound::SupervisorLost).unwrap();
        assert!(matches!(
            serve(&rx, &mut None, &mut context()),
            Err(AppError::PeerClosed(_))
        ));
    }
}
