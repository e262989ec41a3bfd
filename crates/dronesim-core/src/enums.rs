//! Enumeration types used throughout the group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Kind of a grid object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Obstacle,
    Target,
}

impl ObjectKind {
    /// Single-character tag used on the wire.
    pub fn symbol(self) -> char {
        match self {
            ObjectKind::Obstacle => 'o',
            ObjectKind::Target => 't',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'o' => Some(ObjectKind::Obstacle),
            't' => Some(ObjectKind::Target),
            _ => None,
        }
    }

    /// Whether hitting this kind of object scores.
    pub fn scores(self) -> bool {
        matches!(self, ObjectKind::Target)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Obstacle => write!(f, "obstacle"),
            ObjectKind::Target => write!(f, "target"),
        }
    }
}

/// Role of a process in the supervised group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Router,
    Physics,
    ObstacleGenerator,
    TargetGenerator,
    Viewer,
    Input,
}

impl Role {
    /// Launch order. The router comes first because it owns the shared state
    /// and the relay socket every other worker attaches to.
    pub const LAUNCH_ORDER: [Role; 6] = [
        Role::Router,
        Role::Physics,
        Role::ObstacleGenerator,
        Role::TargetGenerator,
        Role::Viewer,
        Role::Input,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Router => "router",
            Role::Physics => "physics",
            Role::ObstacleGenerator => "obstacle-generator",
            Role::TargetGenerator => "target-generator",
            Role::Viewer => "viewer",
            Role::Input => "input",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::LAUNCH_ORDER
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownRole(s.to_string()))
    }
}

/// Inbound relay channel, one per (producer, purpose) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Map resize events from the presentation side.
    Size,
    /// Key presses from the input relay.
    Key,
    /// Complete obstacle sets from the obstacle generator.
    Obstacles,
    /// Complete target sets from the target generator.
    Targets,
}

impl ChannelId {
    pub const ALL: [ChannelId; 4] = [
        ChannelId::Size,
        ChannelId::Key,
        ChannelId::Obstacles,
        ChannelId::Targets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelId::Size => "size",
            ChannelId::Key => "key",
            ChannelId::Obstacles => "obstacles",
            ChannelId::Targets => "targets",
        }
    }

    pub fn for_kind(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Obstacle => ChannelId::Obstacles,
            ObjectKind::Target => ChannelId::Targets,
        }
    }

    /// Consumers that receive every record published on this channel.
    pub fn consumers(self) -> &'static [Consumer] {
        match self {
            ChannelId::Size => &[
                Consumer::Physics,
                Consumer::Viewer,
                Consumer::ObstacleGenerator,
                Consumer::TargetGenerator,
            ],
            ChannelId::Key => &[Consumer::Physics, Consumer::Viewer],
            ChannelId::Obstacles | ChannelId::Targets => &[Consumer::Physics, Consumer::Viewer],
        }
    }

    /// Whether the router replays the latest record to late subscribers.
    /// Key presses are events, not state, so they are never replayed.
    pub fn is_stateful(self) -> bool {
        !matches!(self, ChannelId::Key)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelId::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownChannel(s.to_string()))
    }
}

/// Downstream subscriber of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consumer {
    Physics,
    Viewer,
    ObstacleGenerator,
    TargetGenerator,
}

impl Consumer {
    pub const ALL: [Consumer; 4] = [
        Consumer::Physics,
        Consumer::Viewer,
        Consumer::ObstacleGenerator,
        Consumer::TargetGenerator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Consumer::Physics => "physics",
            Consumer::Viewer => "viewer",
            Consumer::ObstacleGenerator => "obstacle-generator",
            Consumer::TargetGenerator => "target-generator",
        }
    }

    /// Channels this consumer is subscribed to.
    pub fn subscriptions(self) -> impl Iterator<Item = ChannelId> {
        ChannelId::ALL
            .into_iter()
            .filter(move |channel| channel.consumers().contains(&self))
    }

    pub fn for_generator(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Obstacle => Consumer::ObstacleGenerator,
            ObjectKind::Target => Consumer::TargetGenerator,
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consumer {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Consumer::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownConsumer(s.to_string()))
    }
}

/// Synchronisation discipline of the shared-state store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharedStateMode {
    /// Every read and write holds the region's named semaphore.
    #[default]
    Locked,
    /// No synchronisation. Readers may observe stale or torn state; kept for
    /// compatibility runs that rely on exactly that.
    Legacy,
}
