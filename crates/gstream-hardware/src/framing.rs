//! Splitting transport reads into response chunks.
//!
//! A serial read returns whatever bytes happened to arrive, which may be half
//! a line or several lines at once. [`ResponseFramer`] applies the configured
//! [`ResponseFraming`] so a transport can hand the engine one chunk per device
//! line, or pass reads through untouched.

use bytes::Bytes;
use gstream_protocol::LineReassembler;

use crate::types::ResponseFraming;

/// Stateful framing of received bytes.
///
/// # Examples
///
/// ```
/// use gstream_hardware::framing::ResponseFramer;
/// use gstream_hardware::ResponseFraming;
///
/// let mut framer = ResponseFramer::new(ResponseFraming::Lines);
/// assert!(framer.push(b"o").is_empty());
/// assert_eq!(framer.push(b"k\r\nT:20"), vec![&b"ok\r"[..]]);
/// ```
#[derive(Debug)]
pub struct ResponseFramer {
    framing: ResponseFraming,
    reassembler: LineReassembler,
}

impl ResponseFramer {
    pub fn new(framing: ResponseFraming) -> Self {
        Self {
            framing,
            reassembler: LineReassembler::new(),
        }
    }

    pub fn framing(&self) -> ResponseFraming {
        self.framing
    }

    /// Feed one transport read and return the chunks it completes.
    ///
    /// With [`ResponseFraming::Lines`] each chunk is one device line without
    /// its `\n`; a partial line is held until a later read finishes it. With
    /// [`ResponseFraming::Raw`] a non-empty read is returned as one chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        match self.framing {
            ResponseFraming::Raw if bytes.is_empty() => Vec::new(),
            ResponseFraming::Raw => vec![Bytes::copy_from_slice(bytes)],
            ResponseFraming::Lines => self.reassembler.feed_raw(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn frame(framing: ResponseFraming, reads: &[&[u8]]) -> Vec<Bytes> {
        let mut framer = ResponseFramer::new(framing);
        reads.iter().flat_map(|read| framer.push(read)).collect()
    }

    #[rstest]
    #[case::one_line_per_read(&[b"ok\r\n".as_slice(), b"ok\r\n"], &[b"ok\r".as_slice(), b"ok\r"])]
    #[case::several_lines_in_one_read(&[b"echo:busy\nok\n".as_slice()], &[b"echo:busy".as_slice(), b"ok"])]
    #[case::line_split_across_reads(&[b"T:21.5 ".as_slice(), b"/0.0 o", b"k\n"], &[b"T:21.5 /0.0 ok".as_slice()])]
    #[case::terminator_alone(&[b"ok".as_slice(), b"\n"], &[b"ok".as_slice()])]
    #[case::unterminated_tail_is_held(&[b"ok\nstart".as_slice()], &[b"ok".as_slice()])]
    #[case::empty_read(&[b"".as_slice()], &[])]
    fn test_lines_framing(#[case] reads: &[&[u8]], #[case] expected: &[&[u8]]) {
        assert_eq!(frame(ResponseFraming::Lines, reads), expected);
    }

    #[rstest]
    #[case::reads_pass_through(&[b"o".as_slice(), b"k\r\nT:2", b"0\n"], &[b"o".as_slice(), b"k\r\nT:2", b"0\n"])]
    #[case::empty_read_is_skipped(&[b"".as_slice(), b"ok\n"], &[b"ok\n".as_slice()])]
    fn test_raw_framing(#[case] reads: &[&[u8]], #[case] expected: &[&[u8]]) {
        assert_eq!(frame(ResponseFraming::Raw, reads), expected);
    }

    #[test]
    fn test_partial_line_completes_on_later_read() {
        let mut framer = ResponseFramer::new(ResponseFraming::Lines);
        assert!(framer.push(b"ok 1").is_empty());
        assert!(framer.push(b"23").is_empty());
        assert_eq!(framer.push(b"\nok\n"), vec![&b"ok 123"[..], &b"ok"[..]]);
        assert_eq!(framer.framing(), ResponseFraming::Lines);
    }
}
