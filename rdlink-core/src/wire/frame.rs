//! Message framing.
//!
//! Format: `[Identifier:8][Len:4][Payload]`, little-endian.
//!
//! Transports that deliver a byte stream feed arbitrary chunks into a
//! [`FrameDecoder`] and pull complete frames out of it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RdError, Result};
use crate::graph::RdId;

/// Maximum payload size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Identifier plus length prefix.
pub const FRAME_HEADER_SIZE: usize = 12;

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: RdId,
    pub payload: Bytes,
}

/// Append one framed message to `dst`.
///
/// Fails with [`RdError::FrameTooLarge`] when the payload length does not
/// fit the `i32` length prefix; `dst` is left untouched then.
pub fn encode_frame(dst: &mut BytesMut, id: RdId, payload: &[u8]) -> Result<()> {
    let len = length_prefix(payload.len())?;
    dst.reserve(FRAME_HEADER_SIZE + payload.len());
    dst.put_i64_le(id.raw());
    dst.put_i32_le(len);
    dst.put_slice(payload);
    Ok(())
}

fn length_prefix(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| RdError::FrameTooLarge {
        size: len,
        limit: i32::MAX as usize,
    })
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append bytes received from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn payload_len(&self) -> Result<Option<usize>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut header = &self.buf[8..FRAME_HEADER_SIZE];
        let len = header.get_i32_le();
        if len < 0 {
            return Err(RdError::Codec(format!("negative frame length {len}")));
        }
        let len = len as usize;
        if len > self.max_frame_size {
            return Err(RdError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }
        Ok(Some(len))
    }

    /// Whether a whole frame is buffered.
    pub fn has_complete_frame(&self) -> bool {
        match self.payload_len() {
            Ok(Some(len)) => self.buf.len() >= FRAME_HEADER_SIZE + len,
            Ok(None) => false,
            // Surface the error from next_frame.
            Err(_) => true,
        }
    }

    /// Take the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let len = match self.payload_len()? {
            Some(len) => len,
            None => return Ok(None),
        };
        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        let id = RdId::new(self.buf.get_i64_le());
        self.buf.advance(4);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Frame { id, payload }))
    }

    /// Drop everything buffered, e.g. after a framing error.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}
