mod codec;
mod message;

pub use codec::MessageCodec;
pub use message::{
    HandshakeRequest, HandshakeResponse, Heartbeat, Message, MessageType, SubmitResponse,
    SubmitTask, TaskRequest, TaskResponse,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum size of one frame (type byte + payload). Tasks carry only a type
/// name, so frames are tiny; anything near this limit is a corrupt stream.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
