//! # Castle Wire Protocol
//!
//! Types and codecs shared by the Castle server and its clients.
//!
//! ## Layout
//!
//! Every message travels inside a frame:
//!
//! ```text
//! [u32 BE frame length N][u8 type][u32 BE body length B][B body bytes]
//! ```
//!
//! where `B == N - 5`. Integers are big-endian, bools are one byte and strings
//! are a `u32` byte length followed by UTF-8.
//!
//! ## Modules
//!
//! - [`message`]: the [`Message`] enum and its [`MessageType`] byte
//! - [`codec`]: payload encode/decode
//! - [`framing`]: length-prefixed frames over tokio streams
//! - [`error`]: [`ProtocolError`] and [`FrameError`]
//!
//! ## Example
//!
//! ```rust
//! use castle_shared::{codec, Message};
//!
//! let message = Message::Connect { name: "Alice".into() };
//! let bytes = codec::encode(&message);
//! assert_eq!(codec::decode(&bytes).unwrap(), message);
//! ```

pub mod codec;
pub mod error;
pub mod framing;
pub mod message;

pub use error::{FrameError, ProtocolError};
pub use message::{Message, MessageType};

/// Identifies a player for the lifetime of a server process. 0 is reserved.
pub type PlayerId = u32;

/// PlayerId used for system-originated events and draws.
pub const NO_PLAYER: PlayerId = 0;
