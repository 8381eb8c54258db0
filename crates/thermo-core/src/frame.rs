//! Stream reassembly
//!
//! The device writes JSON objects back to back. The only delimiter is the
//! closing brace that ends each object, and the same byte also closes every
//! nested object, so a brace alone says nothing about message boundaries:
//!
//! ```text
//! {"id":3,"result":{"desiredTemp":25.0}}{"type":"update",...}
//!                                      ^ nested close   ^ message close
//! ```
//!
//! [`FrameReassembler`] buffers everything since the last decoded message and,
//! at each closing brace, tries to parse the buffered prefix ending there. The
//! first prefix that parses as a whole is the next message.

use bytes::{Buf, BytesMut};

use crate::codec;
use crate::types::Message;
use crate::{Error, Result};

/// Byte terminating every top-level message
pub const FRAME_DELIMITER: u8 = b'}';

/// Default limit on buffered bytes without a complete message (64KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Incremental decoder for a brace-terminated JSON stream
#[derive(Debug)]
pub struct FrameReassembler {
    buf: BytesMut,
    /// Bytes before this offset hold no delimiter that could end a message
    scanned: usize,
    max_size: usize,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            scanned: 0,
            max_size,
        }
    }

    /// Append a chunk and return every message it completes, in stream order.
    ///
    /// A complete JSON value that is not a known message shape is logged and
    /// skipped; its neighbours are still returned.
    ///
    /// Fails with [`Error::FrameTooLarge`] when the bytes left over exceed the
    /// limit. The buffer is cleared in that case and any messages completed by
    /// the same chunk are dropped with it; the stream is not trustworthy.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        self.buf.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = self.scanned.min(self.buf.len());

        while let Some(offset) = self.buf[start..]
            .iter()
            .position(|b| *b == FRAME_DELIMITER)
        {
            let end = start + offset + 1;
            match codec::decode_value(&self.buf[..end]) {
                Ok(value) => {
                    self.buf.advance(end);
                    self.skip_whitespace();
                    start = 0;
                    match Message::from_value(value) {
                        Ok(message) => messages.push(message),
                        Err(e) => tracing::warn!("skipping message of unknown shape: {}", e),
                    }
                }
                // Not complete yet: the brace closed a nested value
                Err(_) => start = end,
            }
        }

        self.scanned = self.buf.len();

        if self.buf.len() > self.max_size {
            let size = self.buf.len();
            tracing::warn!(size, max = self.max_size, "discarding oversized partial frame");
            self.reset();
            return Err(Error::FrameTooLarge {
                size,
                max: self.max_size,
            });
        }

        Ok(messages)
    }

    /// Bytes held while waiting for the rest of a message
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }

    fn skip_whitespace(&mut self) {
        let leading = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buf.advance(leading);
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}
