//! Errors that end an engine run.
//!
//! Conditions the engine absorbs locally (spurious acknowledgments, deferred
//! dispatch, stalls) are logged and counted, never returned. Only device
//! failures that leave the engine unable to continue surface here.

use gstream_hardware::HardwareError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Device error: {0}")]
    Hardware(#[from] HardwareError),
}
