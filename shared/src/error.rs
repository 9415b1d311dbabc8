use thiserror::Error;

/// Malformed input on the wire. Any of these closes the offending connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("stream closed after {received} of {declared} frame bytes")]
    TruncatedFrame { declared: usize, received: usize },

    #[error("payload too short: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("payload declares a {declared} byte body but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("{0} unexpected trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
}

/// Failure while moving frames over an async stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
