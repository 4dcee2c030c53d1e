use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // Flow-control errors
    #[error("Device connection is not open")]
    NotConnected,

    #[error("Empty command rejected")]
    EmptyCommand,

    #[error("Acknowledgment received while no command was outstanding")]
    SpuriousAcknowledge,

    #[error("Device unresponsive: no acknowledgment after {waited_ms}ms")]
    DeviceUnresponsive { waited_ms: u64 },

    // Boundary errors
    #[error("Input already ended, no further writes accepted")]
    InputClosed,

    #[error("Engine stopped")]
    EngineStopped,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new invalid configuration error.
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::config_invalid("baudRate must be positive").to_string(),
            "Invalid configuration: baudRate must be positive"
        );
        assert_eq!(
            Error::DeviceUnresponsive { waited_ms: 5000 }.to_string(),
            "Device unresponsive: no acknowledgment after 5000ms"
        );
        assert_eq!(Error::EmptyCommand.to_string(), "Empty command rejected");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: Error = io.into();
        assert!(matches!(error, Error::Io(_)));
    }
}
