//! Text protocol primitives for streaming line-oriented commands.
//!
//! - [`LineReassembler`]: turns arbitrarily fragmented chunks into complete lines
//! - [`normalize`]: strips inline comments and whitespace from one command
//! - [`AckDetector`]: recognizes the acknowledgment token in device responses

pub mod ack;
pub mod normalizer;
pub mod reassembler;

pub use ack::AckDetector;
pub use normalizer::{normalize, strip_comment};
pub use reassembler::{LineReassembler, reassemble};
