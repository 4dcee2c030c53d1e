//! Constants shared by every layer of the streamer.
//!
//! The wire convention is plain text: one command per line, terminated by
//! [`LINE_TERMINATOR`], and the device answers each processed command with a
//! response containing [`ACK_TOKEN`]. Inline comments start at
//! [`COMMENT_CHAR`] and run to the end of the line.
//!
//! ```
//! use gstream_core::constants::*;
//!
//! assert_eq!(ACK_TOKEN, "ok");
//! assert_eq!(DEFAULT_BAUD_RATE, 115_200);
//! ```

// ============================================================================
// Line Framing
// ============================================================================

/// Line terminator separating commands in the input stream.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Start of an inline comment. Everything from here to end of line is dropped.
pub const COMMENT_CHAR: char = ';';

// ============================================================================
// Acknowledgment
// ============================================================================

/// Token the device emits once a command has been processed.
///
/// Detection is substring based: `"ok"`, `"ok T:210"` and `"T:210 ok"` all
/// count as an acknowledgment.
pub const ACK_TOKEN: &str = "ok";

/// Prefix applied to every response line surfaced to the consumer.
pub const RESPONSE_PREFIX: &str = "<-";

// ============================================================================
// Connection Defaults
// ============================================================================

/// Default serial device path when none is configured.
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Default serial baud rate in bits per second.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Port identifier that selects the loopback device instead of real hardware.
///
/// Compared case-insensitively.
pub const LOOPBACK_PORT: &str = "/dev/null";

/// Delay before the loopback device synthesizes its acknowledgment.
pub const LOOPBACK_ACK_DELAY_MS: u64 = 10;

/// Response bytes synthesized by the loopback device.
pub const LOOPBACK_RESPONSE: &[u8] = b"ok\r\n";

/// Read timeout of the serial reader thread. Bounds how long the thread
/// takes to notice that the device was closed.
pub const SERIAL_READ_TIMEOUT_MS: u64 = 100;

/// Chunk size used when streaming a file, in bytes.
pub const FILE_CHUNK_SIZE: usize = 256;
