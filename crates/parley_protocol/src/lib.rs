#![forbid(unsafe_code)]

pub mod command;
pub mod message;

pub use command::{ClientCommand, DecodeError, JoinRoom, LeaveRoom, SignalPeer, decode_command};
pub use message::{EncodeError, ServerMessage, UserEntry, encode_message};

/// Default maximum inbound frame size accepted by the transport.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

