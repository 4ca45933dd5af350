//! # parley-shared
//!
//! Wire types shared by the relay server and its clients: the [`Envelope`]
//! protocol messages, the length-prefixed [`EnvelopeCodec`], and the
//! validation rules both sides agree on.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use codec::EnvelopeCodec;
pub use error::{CodecError, FrameError, ProtocolError};
pub use protocol::{Envelope, HistoryEntry};
