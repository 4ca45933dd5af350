//! Length-prefixed JSON framing for [`Envelope`]s.
//!
//! Every frame is a 4-byte big-endian payload length followed by that many
//! bytes of UTF-8 JSON. A byte stream makes no promise that one write arrives
//! as one read, so the decoder buffers partial frames and may yield several
//! envelopes from a single read.
//!
//! A frame whose payload does not parse is reported as an item-level
//! [`FrameError`]; its bytes are consumed and the next frame decodes normally.
//! Only a length prefix above the limit is fatal, since nothing after it can
//! be trusted to be a frame boundary.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::{CodecError, FrameError};
use crate::protocol::Envelope;

#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    /// Create a codec that rejects payloads larger than `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Result<Envelope, FrameError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(len);

        let item =
            Envelope::from_json(&payload).map_err(|e| FrameError::Malformed(e.to_string()));
        Ok(Some(item))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.to_json()?;
        if payload.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Encode a single envelope into a standalone frame.
pub fn encode_frame(envelope: Envelope) -> Result<BytesMut, CodecError> {
    let mut buf = BytesMut::new();
    EnvelopeCodec::default().encode(envelope, &mut buf)?;
    Ok(buf)
}
