//! Connection configuration.
//!
//! A [`Config`] is assembled before the device connection begins opening and
//! is immutable afterwards (it is moved into the engine). Partial updates are
//! expressed as a [`ConfigPatch`] and merged field by field: an invalid field
//! is reported as [`Error::ConfigInvalid`] through the log and the previous
//! value is kept, so a bad configuration never prevents the streamer from
//! starting.
//!
//! The JSON mapping uses the keys `portIdentifier`, `baudRate` and
//! `ackTimeoutMs`:
//!
//! ```
//! use gstream_core::Config;
//!
//! let config = Config::from_json_str(r#"{ "portIdentifier": "/dev/ttyUSB0" }"#);
//! assert_eq!(config.port, "/dev/ttyUSB0");
//! assert_eq!(config.baud_rate, 115_200);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_PORT, LOOPBACK_PORT};
use crate::{Error, Result};

const KEY_PORT: &str = "portIdentifier";
const KEY_BAUD_RATE: &str = "baudRate";
const KEY_ACK_TIMEOUT: &str = "ackTimeoutMs";

/// Complete connection configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Platform-specific device path (e.g. `/dev/ttyACM0`, `COM3`).
    #[serde(rename = "portIdentifier")]
    pub port: String,

    /// Serial speed in bits per second.
    pub baud_rate: u32,

    /// Optional stall detection threshold in milliseconds.
    ///
    /// `None` keeps the unbounded wait for acknowledgments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            ack_timeout_ms: None,
        }
    }
}

impl Config {
    /// Build a configuration from a JSON document.
    ///
    /// A document that is not a JSON object is a `ConfigInvalid` condition:
    /// it is logged and the defaults are returned.
    pub fn from_json_str(json: &str) -> Self {
        let mut config = Self::default();
        match ConfigPatch::from_json_str(json) {
            Ok(patch) => config.apply(patch),
            Err(e) => warn!(error = %e, "Ignoring configuration, using defaults"),
        }
        config
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read. Content problems
    /// never fail; they fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(Self::from_json_str(&json))
    }

    /// Merge a partial configuration into this one.
    ///
    /// Each field is validated on its own. Invalid fields are logged and
    /// skipped; valid ones are applied.
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(port) = patch.port {
            match validate_port(&port) {
                Ok(()) => self.port = port,
                Err(e) => warn!(error = %e, "Keeping port {}", self.port),
            }
        }

        if let Some(baud_rate) = patch.baud_rate {
            match validate_baud_rate(baud_rate) {
                Ok(()) => self.baud_rate = baud_rate,
                Err(e) => warn!(error = %e, "Keeping baud rate {}", self.baud_rate),
            }
        }

        if let Some(timeout_ms) = patch.ack_timeout_ms {
            if timeout_ms == 0 {
                warn!(
                    error = %Error::config_invalid("ackTimeoutMs must be positive"),
                    "Keeping acknowledgment timeout {:?}", self.ack_timeout_ms
                );
            } else {
                self.ack_timeout_ms = Some(timeout_ms);
            }
        }

        debug!(port = %self.port, baud_rate = self.baud_rate, "Configuration updated");
    }

    /// Stall detection threshold, if enabled.
    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    /// Whether this configuration targets the loopback device.
    pub fn is_loopback(&self) -> bool {
        self.port.eq_ignore_ascii_case(LOOPBACK_PORT)
    }
}

/// Partial configuration; unset fields leave the target untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
}

impl ConfigPatch {
    /// Parse a patch from a JSON object.
    ///
    /// Keys with a value of the wrong type are logged and treated as unset.
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON and
    /// [`Error::ConfigInvalid`] when the document is not an object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Parse a patch from an already decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] when `value` is not an object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::config_invalid("configuration must be a JSON object"))?;

        let mut patch = Self::default();

        if let Some(port) = map.get(KEY_PORT) {
            match port.as_str() {
                Some(port) => patch.port = Some(port.to_string()),
                None => warn_wrong_type(KEY_PORT, "a string"),
            }
        }

        if let Some(baud_rate) = map.get(KEY_BAUD_RATE) {
            match baud_rate.as_u64().and_then(|b| u32::try_from(b).ok()) {
                Some(baud_rate) => patch.baud_rate = Some(baud_rate),
                None => warn_wrong_type(KEY_BAUD_RATE, "an unsigned 32-bit integer"),
            }
        }

        if let Some(timeout) = map.get(KEY_ACK_TIMEOUT) {
            match timeout.as_u64() {
                Some(timeout) => patch.ack_timeout_ms = Some(timeout),
                None => warn_wrong_type(KEY_ACK_TIMEOUT, "an unsigned integer"),
            }
        }

        Ok(patch)
    }
}

fn warn_wrong_type(key: &str, expected: &str) {
    warn!(
        error = %Error::config_invalid(format!("{key} must be {expected}")),
        "Ignoring configuration key"
    );
}

fn validate_port(port: &str) -> Result<()> {
    if port.trim().is_empty() {
        return Err(Error::config_invalid("portIdentifier must not be empty"));
    }
    Ok(())
}

fn validate_baud_rate(baud_rate: u32) -> Result<()> {
    if baud_rate == 0 {
        return Err(Error::config_invalid("baudRate must be positive"));
    }
    Ok(())
}
