//! Enum wrapper for device dispatch.
//!
//! Native `async fn` in traits is not object-safe, so `Box<dyn DeviceAdapter>`
//! is not available. [`AnyDevice`] provides concrete type dispatch instead,
//! and keeps the engine future `Send` without boxing.

use bytes::Bytes;
use gstream_core::Config;
use tracing::debug;
#[cfg(not(feature = "hardware-serial"))]
use tracing::warn;

use crate::Result;
use crate::loopback::{LoopbackDevice, LoopbackHandle};
#[cfg(feature = "hardware-serial")]
use crate::serial::SerialDevice;
use crate::traits::{ConnectionState, DeviceAdapter};
use crate::types::DeviceInfo;

/// Any supported transport.
///
/// # Examples
///
/// ```
/// use gstream_hardware::devices::AnyDevice;
/// use gstream_hardware::loopback::LoopbackDevice;
/// use gstream_hardware::traits::{ConnectionState, DeviceAdapter};
///
/// let (loopback, _handle) = LoopbackDevice::new();
/// let device = AnyDevice::Loopback(loopback);
/// assert_eq!(device.state(), ConnectionState::Unopened);
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyDevice {
    /// Real serial port.
    #[cfg(feature = "hardware-serial")]
    Serial(SerialDevice),

    /// Self-acknowledging device.
    Loopback(LoopbackDevice),
}

impl AnyDevice {
    /// Select the transport named by `config`.
    ///
    /// The loopback port identifier selects [`LoopbackDevice`]; anything else
    /// is a serial port. When the crate is built without serial support every
    /// configuration falls back to the loopback device.
    pub fn from_config(config: &Config) -> Self {
        if config.is_loopback() {
            debug!(port = %config.port, "Selected loopback device");
            return Self::loopback().0;
        }

        #[cfg(feature = "hardware-serial")]
        {
            debug!(port = %config.port, "Selected serial device");
            Self::Serial(SerialDevice::new())
        }

        #[cfg(not(feature = "hardware-serial"))]
        {
            warn!(
                port = %config.port,
                "Serial support not compiled in, using loopback device"
            );
            Self::loopback().0
        }
    }

    /// A loopback device together with its observation handle.
    pub fn loopback() -> (Self, LoopbackHandle) {
        let (device, handle) = LoopbackDevice::new();
        (Self::Loopback(device), handle)
    }

    /// Whether this is the loopback transport.
    pub fn is_loopback(&self) -> bool {
        matches!(self, Self::Loopback(_))
    }
}

impl From<LoopbackDevice> for AnyDevice {
    fn from(device: LoopbackDevice) -> Self {
        Self::Loopback(device)
    }
}

#[cfg(feature = "hardware-serial")]
impl From<SerialDevice> for AnyDevice {
    fn from(device: SerialDevice) -> Self {
        Self::Serial(device)
    }
}

impl DeviceAdapter for AnyDevice {
    fn state(&self) -> ConnectionState {
        match self {
            #[cfg(feature = "hardware-serial")]
            Self::Serial(device) => device.state(),
            Self::Loopback(device) => device.state(),
        }
    }

    async fn open(&mut self, config: &Config) -> Result<()> {
        match self {
            #[cfg(feature = "hardware-serial")]
            Self::Serial(device) => device.open(config).await,
            Self::Loopback(device) => device.open(config).await,
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            #[cfg(feature = "hardware-serial")]
            Self::Serial(device) => device.write(bytes).await,
            Self::Loopback(device) => device.write(bytes).await,
        }
    }

    async fn recv(&mut self) -> Result<Bytes> {
        match self {
            #[cfg(feature = "hardware-serial")]
            Self::Serial(device) => device.recv().await,
            Self::Loopback(device) => device.recv().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "hardware-serial")]
            Self::Serial(device) => device.close().await,
            Self::Loopback(device) => device.close().await,
        }
    }

    fn info(&self) -> DeviceInfo {
        match self {
            #[cfg(feature = "hardware-serial")]
            Self::Serial(device) => device.info(),
            Self::Loopback(device) => device.info(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/dev/null")]
    #[case("/Dev/Null")]
    fn test_loopback_port_selects_loopback(#[case] port: &str) {
        let config = Config {
            port: port.to_string(),
            ..Config::default()
        };
        assert!(AnyDevice::from_config(&config).is_loopback());
    }

    #[cfg(feature = "hardware-serial")]
    #[test]
    fn test_other_port_selects_serial() {
        let device = AnyDevice::from_config(&Config::default());
        assert!(matches!(device, AnyDevice::Serial(_)));
        assert_eq!(device.info().name, "Serial");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_loopback() {
        let (mut device, handle) = AnyDevice::loopback();
        device.open(&Config::default()).await.unwrap();
        device.write(b"G90\n").await.unwrap();

        let response = device.recv().await.unwrap();

        assert_eq!(&response[..], b"ok\r\n");
        assert_eq!(handle.written(), vec!["G90\n"]);
        assert_eq!(device.info().name, "Loopback");
    }
}
