//! Acknowledgment detection in device responses.
//!
//! Detection is substring based rather than exact or line based: firmware
//! often reports telemetry on the same line as the acknowledgment
//! (`ok T:210.0 /210.0 B:60.0 /60.0`).

use gstream_core::constants::{ACK_TOKEN, RESPONSE_PREFIX};
use gstream_core::{Error, Result};

/// Recognizes the acknowledgment token in raw response bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckDetector {
    token: Vec<u8>,
}

impl AckDetector {
    /// Detector for the standard `ok` token.
    pub fn new() -> Self {
        Self {
            token: ACK_TOKEN.as_bytes().to_vec(),
        }
    }

    /// Detector for a custom token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if `token` is empty.
    pub fn with_token(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::config_invalid("acknowledgment token must not be empty"));
        }
        Ok(Self {
            token: token.into_bytes(),
        })
    }

    /// Returns `true` iff the token appears anywhere in `response`.
    ///
    /// ```
    /// use gstream_protocol::AckDetector;
    ///
    /// let detector = AckDetector::new();
    /// assert!(detector.on_response(b"ok\n"));
    /// assert!(detector.on_response(b"T:210.0 /210.0 ok"));
    /// assert!(!detector.on_response(b"echo:busy: processing"));
    /// ```
    pub fn on_response(&self, response: &[u8]) -> bool {
        response
            .windows(self.token.len())
            .any(|window| window == self.token.as_slice())
    }

    /// Format a raw response for the consumer boundary: `"<-" + response`.
    ///
    /// ```
    /// use gstream_protocol::AckDetector;
    ///
    /// assert_eq!(AckDetector::format_response(b"ok\r\n"), "<-ok\r\n");
    /// ```
    pub fn format_response(response: &[u8]) -> String {
        format!("{RESPONSE_PREFIX}{}", String::from_utf8_lossy(response))
    }
}

impl Default for AckDetector {
    fn default() -> Self {
        Self::new()
    }
}
