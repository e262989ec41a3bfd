//! Launcher signals turned into control messages.
//!
//! The handlers only raise a flag. A forwarding thread polls the flags and
//! reaches the workers through the supervisor's [`ControlHandle`]:
//! `SIGWINCH` becomes `resize <cols>, <rows>` for the viewer and `SIGUSR1`
//! becomes `regenerate` for both generators.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use dronesim_core::control::ControlMessage;
use dronesim_core::enums::Role;
use dronesim_core::types::GameBounds;

use crate::supervisor::ControlHandle;

const POLL: Duration = Duration::from_millis(100);

static RESIZED: AtomicBool = AtomicBool::new(false);
static REGENERATE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(sig: libc::c_int) {
    match sig {
        libc::SIGWINCH => RESIZED.store(true, Ordering::SeqCst),
        libc::SIGUSR1 => REGENERATE.store(true, Ordering::SeqCst),
        _ => {}
    }
}

/// Signals seen since the last call to [`take_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    pub resized: bool,
    pub regenerate: bool,
}

impl Pending {
    pub fn is_empty(self) -> bool {
        !self.resized && !self.regenerate
    }
}

/// Route `SIGWINCH` and `SIGUSR1` to the flags.
pub fn install() -> io::Result<()> {
    for sig in [libc::SIGWINCH, libc::SIGUSR1] {
        // SAFETY: the handler only stores to atomics.
        let previous =
            unsafe { libc::signal(sig, on_signal as *const () as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn take_pending() -> Pending {
    Pending {
        resized: RESIZED.swap(false, Ordering::SeqCst),
        regenerate: REGENERATE.swap(false, Ordering::SeqCst),
    }
}

/// Size of the terminal behind `fd` in cells.
pub fn terminal_bounds(fd: RawFd) -> Option<GameBounds> {
    // SAFETY: winsize is plain old data and TIOCGWINSZ fills it in.
    let mut size: libc::winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size as *mut libc::winsize) } != 0 {
        return None;
    }
    GameBounds::new(i32::from(size.ws_col), i32::from(size.ws_row)).ok()
}

/// Turn `pending` into control messages. `bounds` is only asked for when the
/// terminal was resized. Returns false once the supervisor is gone.
pub fn forward<F>(pending: Pending, bounds: F, handle: &ControlHandle) -> bool
where
    F: FnOnce() -> Option<GameBounds>,
{
    let mut open = true;
    if pending.regenerate {
        tracing::info!("regenerate requested");
        for role in [Role::ObstacleGenerator, Role::TargetGenerator] {
            open &= handle.send_to(role, ControlMessage::Regenerate);
        }
    }
    if pending.resized {
        match bounds() {
            Some(bounds) => {
                let (width, height) = (bounds.width(), bounds.height());
                tracing::info!(width, height, "terminal resized");
                open &= handle.send_to(Role::Viewer, ControlMessage::Resize(bounds));
            }
            None => tracing::debug!("terminal size unavailable, resize ignored"),
        }
    }
    open
}

/// Poll the flags until the supervisor goes away. Resizes are only forwarded
/// when `follow_terminal` is set.
pub fn spawn_forwarder(
    handle: ControlHandle,
    follow_terminal: bool,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("dronesim-signals".into())
        .spawn(move || loop {
            thread::sleep(POLL);
            let mut pending = take_pending();
            pending.resized &= follow_terminal;
            if pending.is_empty() {
                continue;
            }
            if !forward(pending, || terminal_bounds(libc::STDIN_FILENO), &handle) {
                return;
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_raised_signals_are_pending_once() {
        install().unwrap();
        assert_eq!(unsafe { libc::raise(libc::SIGUSR1) }, 0);
        assert_eq!(unsafe { libc::raise(libc::SIGWINCH) }, 0);

        let pending = take_pending();
        assert!(pending.regenerate);
        assert!(pending.resized);
        assert!(take_pending().is_empty());
    }

    #[test]
    fn test_terminal_bounds_of_a_non_terminal() {
        let file = tempfile::tempfile().unwrap();
        assert_eq!(terminal_bounds(file.as_raw_fd()), None);
    }
}
