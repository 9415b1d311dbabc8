//! Error types for each server layer.
//!
//! Only [`ServerError`] is fatal. Everything else is contained to the
//! connection or request that produced it.

use castle_shared::{FrameError, PlayerId, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Why a connection ended.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("connection stopped")]
    Stopped,

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Protocol(e) => ConnectionError::Protocol(e),
            FrameError::Io(e) => ConnectionError::Io(e),
        }
    }
}

/// A request that was understood but could not be carried out.
///
/// The display text is what the client sees in an `Error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameLogicError {
    #[error("not connected")]
    NotAuthenticated,

    #[error("unexpected message")]
    UnexpectedMessage,

    #[error("Server full")]
    ServerFull,

    #[error("invalid player name: {0}")]
    InvalidName(&'static str),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("unknown upgrade '{0}'")]
    UnknownUpgrade(String),

    #[error("upgrade '{name}' is already at level {level}")]
    MaxLevel { name: String, level: u8 },

    #[error("upgrade '{upgrade}' requires technology '{technology}'")]
    MissingTechnology { upgrade: String, technology: String },

    #[error("not enough {resource}: need {needed}, have {available}")]
    InsufficientResources {
        resource: String,
        needed: u32,
        available: u32,
    },

    #[error("unknown resource node {0}")]
    UnknownNode(u32),

    #[error("resource node {0} is depleted")]
    NodeDepleted(u32),

    #[error("invalid position ({x}, {y})")]
    InvalidPosition { x: i32, y: i32 },

    #[error("a unit cannot attack itself")]
    AttackSelf,

    #[error("chat message rejected: {0}")]
    ChatRejected(&'static str),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors that stop the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
