//! Textual relay codec.
//!
//! Record bodies, byte for byte the formats of the pipe protocol:
//!
//! - resize: `"%d, %d"` (width, height)
//! - object list: `"x,y,k|x,y,k|..."` with `k` in {`o`, `t`}; the counted
//!   form `"%d:%s"` prefixes the number of records
//! - key: one raw byte
//!
//! On a stream each record is terminated by `\n`; the terminator is added
//! and stripped by the channel layer, never by this codec.

use std::fmt::Write as _;

use crate::enums::{ChannelId, ObjectKind};
use crate::error::ProtocolError;
use crate::types::{GameBounds, Object, ObjectSet};

/// A decoded relay record.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Resize(GameBounds),
    Key(u8),
    Objects(ObjectSet),
}

impl WireMessage {
    /// Channel this record travels on.
    pub fn channel(&self) -> ChannelId {
        match self {
            WireMessage::Resize(_) => ChannelId::Size,
            WireMessage::Key(_) => ChannelId::Key,
            WireMessage::Objects(set) => ChannelId::for_kind(set.kind()),
        }
    }

    /// Canonical encoding. Object lists always use the counted form so the
    /// receiver can tell a complete list from a truncated one.
    pub fn encode(&self) -> String {
        match self {
            WireMessage::Resize(bounds) => encode_resize(*bounds),
            WireMessage::Key(key) => char::from(*key).to_string(),
            WireMessage::Objects(set) => encode_objects_counted(set.as_slice()),
        }
    }

    /// Decode a record received on `channel`.
    pub fn decode(channel: ChannelId, record: &str) -> Result<Self, ProtocolError> {
        match channel {
            ChannelId::Size => decode_resize(record).map(WireMessage::Resize),
            ChannelId::Key => decode_key(record).map(WireMessage::Key),
            ChannelId::Obstacles => decode_object_set(ObjectKind::Obstacle, record),
            ChannelId::Targets => decode_object_set(ObjectKind::Target, record),
        }
    }
}

fn decode_object_set(kind: ObjectKind, record: &str) -> Result<WireMessage, ProtocolError> {
    let objects = decode_objects(record)?;
    ObjectSet::from_objects(kind, objects).map(WireMessage::Objects)
}

pub fn encode_resize(bounds: GameBounds) -> String {
    format!("{}, {}", bounds.width(), bounds.height())
}

/// Parse `"%d, %d"`. Whitespace around either number is tolerated.
pub fn decode_resize(record: &str) -> Result<GameBounds, ProtocolError> {
    let malformed = || ProtocolError::MalformedResize(record.to_string());
    let (width, height) = record.split_once(',').ok_or_else(malformed)?;
    let width: i32 = width.trim().parse().map_err(|_| malformed())?;
    let height: i32 = height.trim().parse().map_err(|_| malformed())?;
    GameBounds::new(width, height)
}

/// Plain pipe-separated body.
pub fn encode_objects(objects: &[Object]) -> String {
    let mut body = String::with_capacity(objects.len() * 8);
    for (i, object) in objects.iter().enumerate() {
        if i > 0 {
            body.push('|');
        }
        let _ = write!(body, "{},{},{}", object.x, object.y, object.kind.symbol());
    }
    body
}

/// Counted form: `"<n>:<body>"`.
pub fn encode_objects_counted(objects: &[Object]) -> String {
    format!("{}:{}", objects.len(), encode_objects(objects))
}

/// Parse either object-list form. A fourth `0|1` field per record (the hit
/// flag some publishers append) is accepted.
pub fn decode_objects(record: &str) -> Result<Vec<Object>, ProtocolError> {
    let (expected, body) = split_count(record)?;

    let mut objects = Vec::new();
    if !body.is_empty() {
        for (index, entry) in body.split('|').enumerate() {
            objects.push(decode_object(index, entry)?);
        }
    }

    if let Some(expected) = expected {
        if expected != objects.len() {
            return Err(ProtocolError::CountMismatch {
                expected,
                actual: objects.len(),
            });
        }
    }
    Ok(objects)
}

fn split_count(record: &str) -> Result<(Option<usize>, &str), ProtocolError> {
    match record.split_once(':') {
        Some((count, body)) => {
            let count = count
                .trim()
                .parse()
                .map_err(|_| ProtocolError::MalformedCount(count.to_string()))?;
            Ok((Some(count), body))
        }
        None => Ok((None, record)),
    }
}

fn decode_object(index: usize, entry: &str) -> Result<Object, ProtocolError> {
    let malformed = || ProtocolError::MalformedObject {
        index,
        record: entry.to_string(),
    };
    let fields: Vec<&str> = entry.split(',').map(str::trim).collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(malformed());
    }

    let x: i32 = fields[0].parse().map_err(|_| malformed())?;
    let y: i32 = fields[1].parse().map_err(|_| malformed())?;

    let mut symbol = fields[2].chars();
    let kind = match (symbol.next(), symbol.next()) {
        (Some(c), None) => ObjectKind::from_symbol(c),
        _ => None,
    }
    .ok_or_else(|| ProtocolError::UnknownObjectKind(fields[2].to_string()))?;

    let hit = match fields.get(3) {
        None | Some(&"0") => false,
        Some(&"1") => true,
        Some(_) => return Err(malformed()),
    };

    Ok(Object { x, y, kind, hit })
}

/// A key record is exactly one printable ASCII byte.
pub fn decode_key(record: &str) -> Result<u8, ProtocolError> {
    match record.as_bytes() {
        [byte] if byte.is_ascii_graphic() => Ok(*byte),
        _ => Err(ProtocolError::MalformedKey(record.to_string())),
    }
}
