//! Failure taxonomy shared by every worker.
//!
//! Per-record problems (`ProtocolViolation`, `PeerClosed`) are logged where
//! they happen and the loop goes on. The rest end the process with a non-zero
//! status, which the supervisor turns into a group teardown.

use thiserror::Error;

use dronesim_core::enums::Role;
use dronesim_core::ProtocolError;

use crate::channel::ChannelError;
use crate::shared_state::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    /// A channel, socket or device the worker needs is missing.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("shared state unavailable: {0}")]
    SharedStateUnavailable(#[from] StoreError),
    #[error("protocol violation on {context}: {source}")]
    ProtocolViolation {
        context: String,
        #[source]
        source: ProtocolError,
    },
    #[error("peer closed: {0}")]
    PeerClosed(String),
    #[error("{role} (pid {pid}) stopped answering heartbeats")]
    LivenessTimeout { role: Role, pid: u32 },
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Protocol(source) => AppError::ProtocolViolation {
                context: "relay".into(),
                source,
            },
            other => AppError::ResourceUnavailable(other.to_string()),
        }
    }
}
