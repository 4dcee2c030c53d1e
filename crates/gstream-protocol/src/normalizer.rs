//! Per-line command normalization.
//!
//! Only semicolon comments are recognized and there is no escaping: the first
//! `;` ends the command. A line that normalizes to nothing is still a command
//! (a bare terminator), since devices accept an empty line as a no-op.

use gstream_core::constants::{COMMENT_CHAR, LINE_TERMINATOR};

/// Remove an inline comment, if any.
///
/// ```
/// use gstream_protocol::strip_comment;
///
/// assert_eq!(strip_comment("G1 X10 ; move"), "G1 X10 ");
/// assert_eq!(strip_comment("G28"), "G28");
/// ```
pub fn strip_comment(raw: &str) -> &str {
    match raw.find(COMMENT_CHAR) {
        Some(pos) => &raw[..pos],
        None => raw,
    }
}

/// Normalize one raw line into the exact text written to the device.
///
/// ```
/// use gstream_protocol::normalize;
///
/// assert_eq!(normalize("  G1 X10 ; move\n"), "G1 X10\n");
/// assert_eq!(normalize(";comment\n"), "\n");
/// ```
pub fn normalize(raw: &str) -> String {
    let command = strip_comment(raw).trim();
    let mut normalized = String::with_capacity(command.len() + 1);
    normalized.push_str(command);
    normalized.push(char::from(LINE_TERMINATOR));
    normalized
}
