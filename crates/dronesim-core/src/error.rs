//! Errors raised while decoding relay and control records.

use thiserror::Error;

use crate::enums::ObjectKind;

/// A malformed wire or control record. The record is dropped; the reader keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty record")]
    Empty,
    #[error("record is not valid UTF-8: {0:?}")]
    InvalidUtf8(String),
    #[error("malformed resize record {0:?}")]
    MalformedResize(String),
    #[error("map bounds must be positive, got {width}x{height}")]
    InvalidBounds { width: i32, height: i32 },
    #[error("malformed object #{index}: {record:?}")]
    MalformedObject { index: usize, record: String },
    #[error("unknown object kind {0:?}")]
    UnknownObjectKind(String),
    #[error("expected {expected} objects, found {found}")]
    MixedObjectKinds {
        expected: ObjectKind,
        found: ObjectKind,
    },
    #[error("count prefix says {expected} objects, body has {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("malformed count prefix {0:?}")]
    MalformedCount(String),
    #[error("key record must be one printable byte, got {0:?}")]
    MalformedKey(String),
    #[error("unknown control message {0:?}")]
    UnknownControl(String),
    #[error("malformed control message {0:?}")]
    MalformedControl(String),
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
    #[error("unknown consumer {0:?}")]
    UnknownConsumer(String),
    #[error("unknown role {0:?}")]
    UnknownRole(String),
}
