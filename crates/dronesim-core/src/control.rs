//! Control-plane messages exchanged between the supervisor and its workers.
//!
//! Heartbeat request and reply, terminate, regenerate and terminal resize
//! travel as text lines instead of signals. One message per line.

use crate::error::ProtocolError;
use crate::types::GameBounds;
use crate::wire::{decode_resize, encode_resize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Supervisor -> worker: heartbeat request.
    Ping,
    /// Worker -> supervisor: heartbeat reply carrying the worker's identity.
    Pong { pid: u32 },
    /// Worker -> supervisor: initialisation finished.
    Ready { pid: u32 },
    /// Supervisor -> worker: release resources and exit cleanly.
    Terminate,
    /// Supervisor -> generator: publish a fresh object set now.
    Regenerate,
    /// Supervisor -> viewer: the terminal changed size.
    Resize(GameBounds),
}

impl ControlMessage {
    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Ping => "ping".to_string(),
            ControlMessage::Pong { pid } => format!("pong {pid}"),
            ControlMessage::Ready { pid } => format!("ready {pid}"),
            ControlMessage::Terminate => "terminate".to_string(),
            ControlMessage::Regenerate => "regenerate".to_string(),
            ControlMessage::Resize(bounds) => format!("resize {}", encode_resize(*bounds)),
        }
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let malformed = || ProtocolError::MalformedControl(line.to_string());
        let pid = || rest.parse::<u32>().map_err(|_| malformed());

        match verb {
            "ping" if rest.is_empty() => Ok(ControlMessage::Ping),
            "terminate" if rest.is_empty() => Ok(ControlMessage::Terminate),
            "regenerate" if rest.is_empty() => Ok(ControlMessage::Regenerate),
            "pong" => Ok(ControlMessage::Pong { pid: pid()? }),
            "ready" => Ok(ControlMessage::Ready { pid: pid()? }),
            "resize" => decode_resize(rest).map(ControlMessage::Resize),
            "ping" | "terminate" | "regenerate" => Err(malformed()),
            _ => Err(ProtocolError::UnknownControl(line.to_string())),
        }
    }
}
