use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("Username too long: {len} characters (max {max})")]
    UsernameTooLong { len: usize, max: usize },

    #[error("Username contains control characters")]
    InvalidUsername,

    #[error("Receiver must not be empty")]
    EmptyReceiver,
}

/// A single frame could not be turned into an [`Envelope`](crate::Envelope).
///
/// The frame's bytes have already been consumed, so the stream stays in sync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Errors that break framing for the rest of the stream.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
