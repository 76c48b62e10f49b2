//! Line framing for instrument replies.
//!
//! Serial reads return arbitrary chunks: half a line, a full line, or a line
//! followed by the start of the next one. [`LineBuffer`] accumulates bytes and
//! hands out complete lines terminated by LF (an optional preceding CR is
//! stripped).
//!
//! # Usage
//!
//! ```
//! use benchline_protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//! buffer.feed(b"+1.2345").unwrap();
//! assert!(buffer.next_line().is_none());
//!
//! buffer.feed(b"E+02\r\n+1\n").unwrap();
//! assert_eq!(buffer.next_line().as_deref(), Some("+1.2345E+02"));
//! assert_eq!(buffer.next_line().as_deref(), Some("+1"));
//! ```

use crate::{Result, error::ResponseError};
use benchline_core::constants::MAX_RESPONSE_LINE;
use bytes::{Buf, BytesMut};

/// Initial buffer capacity; one numeric reply fits comfortably.
const INITIAL_BUFFER_CAPACITY: usize = 256;

const LF: u8 = b'\n';
const CR: u8 = b'\r';

#[derive(Debug)]
pub struct LineBuffer {
    buffer: BytesMut,
    limit: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_RESPONSE_LINE)
    }

    /// Buffer rejecting partial lines longer than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            limit,
        }
    }

    /// Append bytes read from the wire.
    ///
    /// # Errors
    /// Returns `ResponseError::LineTooLong` and discards the buffer if the
    /// pending partial line grows past the limit. Complete lines queued
    /// before the fault are lost with it.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);

        let pending = match self.buffer.iter().rposition(|&b| b == LF) {
            Some(pos) => self.buffer.len() - pos - 1,
            None => self.buffer.len(),
        };
        if pending > self.limit {
            self.buffer.clear();
            return Err(ResponseError::LineTooLong { limit: self.limit });
        }
        Ok(())
    }

    /// Take the next complete line, without its terminator.
    ///
    /// Non-ASCII bytes are replaced rather than rejected; the reply parser
    /// reports them as malformed.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == LF)?;
        let mut line = self.buffer.split_to(pos);
        self.buffer.advance(1);

        if line.last() == Some(&CR) {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Returns `true` if at least one complete line is buffered.
    pub fn has_line(&self) -> bool {
        self.buffer.contains(&LF)
    }

    /// Number of buffered bytes, complete lines included.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard everything, e.g. before a new exchange.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
