//! Device transports for the G-code streamer.
//!
//! Every transport implements [`DeviceAdapter`]: open a connection, write raw
//! command bytes, and deliver raw response chunks as they arrive. Two
//! transports exist:
//!
//! - [`SerialDevice`](serial::SerialDevice): a real serial port (feature
//!   `hardware-serial`, enabled by default)
//! - [`LoopbackDevice`]: acknowledges every write after a short delay, used
//!   when the configured port is `/dev/null` and throughout the tests
//!
//! The flow-control engine holds an [`AnyDevice`], the enum wrapper that
//! selects a transport from the configuration:
//!
//! ```
//! use gstream_core::Config;
//! use gstream_hardware::{AnyDevice, DeviceAdapter};
//!
//! #[tokio::main]
//! async fn main() -> gstream_hardware::Result<()> {
//!     let config = Config {
//!         port: "/dev/null".to_string(),
//!         ..Config::default()
//!     };
//!
//!     let mut device = AnyDevice::from_config(&config);
//!     device.open(&config).await?;
//!     device.write(b"G28\n").await?;
//!
//!     let response = device.recv().await?;
//!     assert_eq!(&response[..], b"ok\r\n");
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`Result<T>`][error::Result] with a
//! [`HardwareError`]. A write refused because the connection is not open yet
//! is distinguishable through [`HardwareError::is_not_open`], so callers can
//! defer instead of failing.

pub mod devices;
pub mod error;
pub mod framing;
pub mod loopback;
#[cfg(feature = "hardware-serial")]
pub mod serial;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::AnyDevice;
pub use error::{HardwareError, Result};
pub use framing::ResponseFramer;
pub use loopback::{LoopbackDevice, LoopbackHandle};
pub use traits::{ConnectionState, DeviceAdapter};
pub use types::{DeviceInfo, PortInfo, ResponseFraming};

#[cfg(feature = "hardware-serial")]
pub use serial::{SerialDevice, list_ports};
