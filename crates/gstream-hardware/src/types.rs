//! Common types shared across device adapter implementations.

use serde::{Deserialize, Serialize};

/// Generic device information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Adapter name (e.g., "Serial", "Loopback").
    pub name: String,

    /// Transport endpoint, such as the serial device path.
    pub endpoint: String,

    /// Baud rate, when the transport has one.
    pub baud_rate: Option<u32>,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with required fields.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            baud_rate: None,
        }
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }
}

/// How a transport turns received bytes into response chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFraming {
    /// Split received bytes on the line terminator; each chunk is one
    /// device line without its terminator.
    #[default]
    Lines,

    /// Deliver each transport read unmodified.
    Raw,
}

/// A serial port reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,

    /// Human readable description of the port type.
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_builder() {
        let info = DeviceInfo::new("Serial", "/dev/ttyUSB0").with_baud_rate(250_000);
        assert_eq!(info.name, "Serial");
        assert_eq!(info.endpoint, "/dev/ttyUSB0");
        assert_eq!(info.baud_rate, Some(250_000));
    }

    #[test]
    fn test_default_framing_is_lines() {
        assert_eq!(ResponseFraming::default(), ResponseFraming::Lines);
    }
}
