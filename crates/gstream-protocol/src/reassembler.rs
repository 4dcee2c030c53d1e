//! Line reassembly for fragmented text streams.
//!
//! Producers (files, pipes, an interactive terminal, a serial port) deliver
//! text in chunks whose boundaries have nothing to do with line boundaries.
//! [`LineReassembler`] accumulates bytes and emits every complete,
//! terminator-delimited line, carrying the unterminated tail forward to the
//! next call.
//!
//! # Usage
//!
//! ```
//! use gstream_protocol::LineReassembler;
//!
//! let mut reassembler = LineReassembler::new();
//!
//! assert!(reassembler.feed(b"G28\nG1 X").len() == 1);
//! assert_eq!(reassembler.pending(), b"G1 X");
//!
//! let lines = reassembler.feed(b"10\n");
//! assert_eq!(lines, vec!["G1 X10".to_string()]);
//! assert!(!reassembler.has_pending());
//! ```
//!
//! # Unbounded lines
//!
//! No maximum line length is enforced. A producer that never sends a
//! terminator makes the pending buffer grow without limit.

use bytes::{Buf, Bytes, BytesMut};
use gstream_core::constants::LINE_TERMINATOR;
use tracing::trace;

/// Initial capacity of the pending buffer.
///
/// Sized for a handful of typical command lines.
const INITIAL_BUFFER_CAPACITY: usize = 1024; // 1 KB

/// Stateful splitter turning chunks into complete lines.
///
/// At most one unterminated fragment is held at any time; it becomes the
/// prefix of the first line completed by a later chunk.
#[derive(Debug)]
pub struct LineReassembler {
    /// Unterminated trailing fragment.
    pending: BytesMut,

    /// Number of leading bytes of `pending` already known to contain no terminator.
    scanned: usize,
}

impl LineReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self {
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
        }
    }

    /// Feed a chunk and return the complete lines it finished, in order.
    ///
    /// Lines are returned without their terminator. Bytes that are not valid
    /// UTF-8 are replaced with `U+FFFD`. A chunk that contains no terminator
    /// yields no lines; that is not an error.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.feed_raw(chunk)
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect()
    }

    /// Same as [`feed`](Self::feed) but returns the raw line bytes.
    pub fn feed_raw(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == LINE_TERMINATOR)
        {
            let end = self.scanned + offset;
            let line = self.pending.split_to(end).freeze();
            self.pending.advance(1);
            self.scanned = 0;
            lines.push(line);
        }
        self.scanned = self.pending.len();

        trace!(
            chunk_len = chunk.len(),
            lines = lines.len(),
            pending = self.pending.len(),
            "Reassembled chunk"
        );
        lines
    }

    /// The unterminated fragment carried to the next chunk.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Whether an unterminated fragment is being carried.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remove and return the carried fragment, if any.
    pub fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let fragment = self.pending.split().freeze();
        self.scanned = 0;
        Some(String::from_utf8_lossy(&fragment).into_owned())
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateless form of the reassembly contract.
///
/// Concatenates `carry` and `chunk`, splits on the terminator and returns the
/// complete lines plus the new carry (empty when the input ended with a
/// terminator).
///
/// ```
/// use gstream_protocol::reassemble;
///
/// let (lines, carry) = reassemble(b"28\nG90\nM8", b"G");
/// assert_eq!(lines, vec!["G28", "G90"]);
/// assert_eq!(carry, "M8");
/// ```
pub fn reassemble(chunk: &[u8], carry: &[u8]) -> (Vec<String>, String) {
    let mut reassembler = LineReassembler::new();
    reassembler.pending.extend_from_slice(carry);
    let lines = reassembler.feed(chunk);
    let carry = reassembler.take_pending().unwrap_or_default();
    (lines, carry)
}
