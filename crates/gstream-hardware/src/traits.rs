//! Device adapter trait definitions.
//!
//! This module defines the contract between the flow-control engine and the
//! transport that reaches the device. Every adapter offers the same
//! capability set: open a connection, write raw bytes, and deliver raw
//! response chunks as they arrive.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT),
//! eliminating the need for the `async_trait` macro.

#![allow(async_fn_in_trait)]

use std::fmt;

use bytes::Bytes;
use gstream_core::Config;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::DeviceInfo;

/// Lifecycle of a device connection.
///
/// ```text
/// Unopened ──open()──> Opening ──ok──> Open ──close()──> Closed
///                         │
///                         └──err──> Failed
/// ```
///
/// `Closed` and `Failed` are terminal. Writes and response reads are only
/// valid while `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Adapter created, `open()` not called yet.
    Unopened,

    /// `open()` in progress.
    Opening,

    /// Connection established; writes are accepted.
    Open,

    /// Connection closed by the caller.
    Closed,

    /// Opening failed or the transport was lost.
    Failed,
}

impl ConnectionState {
    /// Whether writes and response reads are valid in this state.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unopened => "unopened",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Device adapter abstraction.
///
/// Represents the half-duplex channel to a machine controller. The adapter
/// does not interpret what it carries: commands go out as raw bytes and
/// responses come back as raw chunks.
///
/// # Object Safety and Dynamic Dispatch
///
/// **NOTE**: This trait is NOT object-safe because `async fn` methods return
/// `impl Future`. For dynamic dispatch use the enum wrapper
/// [`AnyDevice`](crate::devices::AnyDevice).
///
/// # Examples
///
/// ```no_run
/// use gstream_core::Config;
/// use gstream_hardware::traits::DeviceAdapter;
/// use gstream_hardware::error::Result;
///
/// async fn send_home<D: DeviceAdapter>(device: &mut D) -> Result<()> {
///     device.open(&Config::default()).await?;
///     device.write(b"G28\n").await?;
///     let response = device.recv().await?;
///     println!("{}", String::from_utf8_lossy(&response));
///     Ok(())
/// }
/// ```
pub trait DeviceAdapter: Send {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Open the connection described by `config`.
    ///
    /// Calling `open` on an adapter that is already open is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened (the adapter then
    /// moves to [`ConnectionState::Failed`]) or if the adapter is in a
    /// terminal state.
    async fn open(&mut self, config: &Config) -> Result<()>;

    /// Write raw bytes to the device.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::NotOpen`](crate::HardwareError::NotOpen) when
    /// the connection is not open, or a transport error if the write fails.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Wait for the next chunk of response bytes from the device.
    ///
    /// This method is cancel safe: if the future is dropped before it
    /// completes, no response bytes are lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open or the transport was
    /// lost.
    async fn recv(&mut self) -> Result<Bytes>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport reports a failure while closing.
    async fn close(&mut self) -> Result<()>;

    /// Static information about the adapter.
    fn info(&self) -> DeviceInfo;
}
