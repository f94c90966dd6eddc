//! Length-delimited frame codec for the agent TCP stream.
//!
//! Wire format: 4-byte big-endian length prefix + payload bytes.
//!
//! Decoding emits raw payload bytes; envelope parsing happens in a separate
//! stage so a malformed JSON body is a per-message error while an oversized
//! declared length stays fatal to the connection. Message boundaries come
//! only from the declared length, never from content inspection.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::{ProtocolError, DEFAULT_MAX_FRAME_BYTES, LENGTH_PREFIX_SIZE};

/// Codec for framing envelopes over a byte stream.
pub struct FrameCodec {
    max_frame: usize,
    /// Set after an oversized declared length; further decoding is refused.
    poisoned: bool,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            poisoned: false,
        }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.poisoned {
            // Reassembly cannot be trusted past a bad length header.
            src.clear();
            return Ok(None);
        }

        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the declared length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame {
            self.poisoned = true;
            src.clear();
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<Envelope> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
