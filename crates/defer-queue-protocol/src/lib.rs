mod message;
mod codec;

pub use message::{
    AckResponse, AuthenticateRequest, ErrorKind, Message, MessageType, NackResponse,
    QueueRef, ReceiveMessagesRequest, SendMessageRequest, SetVisibilityTimeoutRequest,
    DeleteMessageRequest,
};
pub use codec::MessageCodec;

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

/// Maximum frame size: 4MB (a batch of received messages plus overhead)
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
