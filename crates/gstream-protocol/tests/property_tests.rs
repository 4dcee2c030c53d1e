//! Property-based tests for line reassembly and normalization.
//!
//! These tests use proptest to generate random command text and random
//! fragmentations of it, and verify that the emitted lines never depend on
//! where the chunk boundaries fall.

use gstream_protocol::{LineReassembler, normalize};
use proptest::prelude::*;

/// Lines as the producer would see them: everything before the last
/// terminator, split on the terminator. The unterminated tail is not a line.
fn expected_lines(text: &str) -> Vec<String> {
    let mut parts: Vec<String> = text.split('\n').map(str::to_string).collect();
    parts.pop();
    parts
}

fn feed_all(chunks: &[&[u8]]) -> (Vec<String>, Vec<u8>) {
    let mut reassembler = LineReassembler::new();
    let mut lines = Vec::new();
    for chunk in chunks {
        lines.extend(reassembler.feed(chunk));
    }
    (lines, reassembler.pending().to_vec())
}

/// Strategy for command-file-like text: short lines with optional comments
/// and blank lines, sometimes without a final terminator.
fn command_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("([GMT][0-9]{1,3}( [XYZEFS][0-9.]{1,5}){0,3}( ?;[a-z ]{0,8})?\n|\n){0,12}[G0-9 ]{0,4}")
        .expect("Failed to create command text regex strategy")
}

/// Strategy for sorted, deduplicated cut points inside a buffer of `len` bytes.
fn cut_points(len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..=len, 0..8).prop_map(|mut cuts| {
        cuts.sort_unstable();
        cuts.dedup();
        cuts
    })
}

fn split_at_points<'a>(bytes: &'a [u8], cuts: &[usize]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        chunks.push(&bytes[start..cut]);
        start = cut;
    }
    chunks.push(&bytes[start..]);
    chunks
}

proptest! {
    /// Property: any fragmentation yields the same line sequence.
    #[test]
    fn prop_fragmentation_independent(
        (text, cuts) in command_text().prop_flat_map(|text| {
            let len = text.len();
            (Just(text), cut_points(len))
        })
    ) {
        let bytes = text.as_bytes();
        let chunks = split_at_points(bytes, &cuts);

        let (lines, pending) = feed_all(&chunks);

        prop_assert_eq!(lines, expected_lines(&text));
        let tail = text.rsplit('\n').next().unwrap_or_default();
        prop_assert_eq!(pending, tail.as_bytes().to_vec());
    }

    /// Property: normalized output always carries exactly one terminator and
    /// never contains the comment character.
    #[test]
    fn prop_normalized_shape(raw in "[ -~\t]{0,40}") {
        let normalized = normalize(&raw);
        prop_assert!(normalized.ends_with('\n'));
        prop_assert_eq!(normalized.matches('\n').count(), 1);
        prop_assert!(!normalized.contains(';'));
        prop_assert_eq!(normalized.trim(), normalized.trim_end_matches('\n'));
    }
}

/// Every single split point of a fixed program reproduces the same lines.
#[test]
fn test_split_at_every_boundary() {
    let text = "M104 S200 ; heat\nG28\n\nG90\nG1 Z0.200 F7800.000\nM82";
    let expected = expected_lines(text);
    let bytes = text.as_bytes();

    for cut in 0..=bytes.len() {
        let (lines, pending) = feed_all(&[&bytes[..cut], &bytes[cut..]]);
        assert_eq!(lines, expected, "split at byte {cut}");
        assert_eq!(pending, b"M82", "split at byte {cut}");
    }
}

/// Byte-at-a-time delivery is the most fragmented stream possible.
#[test]
fn test_one_byte_chunks() {
    let text = "G21\nG92 E0\nM82\n";
    let chunks: Vec<&[u8]> = text.as_bytes().chunks(1).collect();

    let (lines, pending) = feed_all(&chunks);

    assert_eq!(lines, vec!["G21", "G92 E0", "M82"]);
    assert!(pending.is_empty());
}
