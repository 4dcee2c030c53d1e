//! Error types for device operations.
//!
//! This module defines error types specific to device adapters: failures to
//! open the transport, writes on a connection that is not open, write
//! timeouts, disconnection while streaming, and transport I/O errors.

use crate::traits::ConnectionState;

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation requires an open connection.
    #[error("Connection not open (state: {state})")]
    NotOpen { state: ConnectionState },

    /// A write did not complete within the port timeout.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Device communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Device initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new not-open error for the given state.
    pub fn not_open(state: ConnectionState) -> Self {
        Self::NotOpen { state }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this error means the write was refused because the
    /// connection is not open yet (as opposed to a transport failure).
    pub fn is_not_open(&self) -> bool {
        matches!(self, Self::NotOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = HardwareError::disconnected("/dev/ttyACM0");
        assert!(matches!(error, HardwareError::Disconnected { .. }));
        assert_eq!(error.to_string(), "Device disconnected: /dev/ttyACM0");
    }

    #[test]
    fn test_not_open_error() {
        let error = HardwareError::not_open(ConnectionState::Opening);
        assert!(error.is_not_open());
        assert_eq!(error.to_string(), "Connection not open (state: opening)");
    }

    #[test]
    fn test_timeout_error() {
        let error = HardwareError::timeout(3000);
        assert!(!error.is_not_open());
        assert_eq!(error.to_string(), "Operation timeout after 3000ms");
    }

    #[test]
    fn test_communication_error() {
        let error = HardwareError::communication("Serial port closed");
        assert!(matches!(error, HardwareError::CommunicationError { .. }));
        assert_eq!(error.to_string(), "Communication error: Serial port closed");
    }

    #[test]
    fn test_error_display() {
        let cases = [
            (
                HardwareError::initialization_failed("No such file or directory"),
                "Initialization failed: No such file or directory",
            ),
            (
                HardwareError::Io(std::io::Error::other("broken pipe")),
                "I/O error: broken pipe",
            ),
            (HardwareError::other("serial write task failed"), "serial write task failed"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
            assert!(!error.is_not_open());
        }
    }
}
