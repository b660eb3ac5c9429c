mod codec;
mod message;

pub use codec::{FrameCodec, MasterCodec, WorkerCodec};
pub use message::{GeocodeReply, GeocodeRequest, WireMessage};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Connection closed with {0} bytes of an unfinished frame")]
    Truncated(usize),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Garbled message: {0}")]
    Garbled(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Whether the failure happened below the message layer.
    ///
    /// Transport failures cover resets, timeouts and frames that do not parse
    /// as JSON; everything else is a well-framed message with bad fields.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ProtocolError::InvalidMessage(_))
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Io(_) => "io",
            ProtocolError::Timeout(_) => "timeout",
            ProtocolError::ConnectionClosed => "closed",
            ProtocolError::Truncated(_) => "truncated",
            ProtocolError::MessageTooLarge(_) => "too_large",
            ProtocolError::Garbled(_) => "garbled",
            ProtocolError::InvalidMessage(_) => "invalid",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum encoded size of one frame body
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;
