//! Serial transport backed by the `serialport` crate.
//!
//! `serialport` exposes blocking handles, so the adapter splits the port in
//! two: a reader thread owns a cloned handle and forwards response chunks
//! through a channel, while writes run on the blocking thread pool against
//! the original handle.
//!
//! ```text
//! SerialDevice::write ──spawn_blocking──> port (write half)
//!
//! reader thread ──read──> port clone ──chunks──> mpsc ──> SerialDevice::recv
//! ```

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use gstream_core::Config;
use gstream_core::constants::SERIAL_READ_TIMEOUT_MS;
use serialport::{SerialPort, SerialPortType};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::framing::ResponseFramer;
use crate::traits::{ConnectionState, DeviceAdapter};
use crate::types::{DeviceInfo, PortInfo, ResponseFraming};
use crate::{HardwareError, Result};

/// Capacity of the response channel between the reader thread and `recv()`.
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Size of a single transport read.
const READ_BUFFER_SIZE: usize = 1024;

/// Serial port device adapter.
///
/// # Examples
///
/// ```no_run
/// use gstream_core::Config;
/// use gstream_hardware::serial::SerialDevice;
/// use gstream_hardware::traits::DeviceAdapter;
///
/// # async fn example() -> gstream_hardware::Result<()> {
/// let config = Config {
///     port: "/dev/ttyUSB0".to_string(),
///     ..Config::default()
/// };
///
/// let mut device = SerialDevice::new();
/// device.open(&config).await?;
/// device.write(b"M115\n").await?;
/// let response = device.recv().await?;
/// # Ok(())
/// # }
/// ```
pub struct SerialDevice {
    /// Current connection state.
    state: ConnectionState,

    /// How received bytes are split into response chunks.
    framing: ResponseFraming,

    /// Write half of the port (None until open).
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,

    /// Response chunks from the reader thread (None until open).
    responses: Option<mpsc::Receiver<Bytes>>,

    /// Tells the reader thread to stop.
    shutdown: Arc<AtomicBool>,

    /// Port name and speed, recorded at open.
    endpoint: String,
    baud_rate: Option<u32>,
}

impl SerialDevice {
    /// Create an unopened serial adapter with line framing.
    pub fn new() -> Self {
        Self::with_framing(ResponseFraming::default())
    }

    /// Create an unopened serial adapter with the given response framing.
    pub fn with_framing(framing: ResponseFraming) -> Self {
        Self {
            state: ConnectionState::Unopened,
            framing,
            port: None,
            responses: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            endpoint: String::new(),
            baud_rate: None,
        }
    }

    fn stop_reader(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.responses = None;
        self.port = None;
    }
}

impl fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialDevice")
            .field("state", &self.state)
            .field("framing", &self.framing)
            .field("endpoint", &self.endpoint)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl Default for SerialDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl DeviceAdapter for SerialDevice {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn open(&mut self, config: &Config) -> Result<()> {
        match self.state {
            ConnectionState::Open => {
                debug!(port = %self.endpoint, "Serial port already open");
                return Ok(());
            }
            state if state.is_terminal() => {
                return Err(HardwareError::initialization_failed(format!(
                    "serial port {} is {state}",
                    self.endpoint
                )));
            }
            _ => {}
        }

        self.state = ConnectionState::Opening;
        self.endpoint = config.port.clone();
        self.baud_rate = Some(config.baud_rate);
        info!(port = %config.port, baud_rate = config.baud_rate, "Opening serial port");

        let port_name = config.port.clone();
        let baud_rate = config.baud_rate;
        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
                .open()
        })
        .await
        .map_err(|e| HardwareError::other(format!("serial open task failed: {e}")))
        .and_then(|result| {
            result.map_err(|e| HardwareError::initialization_failed(e.to_string()))
        });

        let port = match opened {
            Ok(port) => port,
            Err(e) => {
                error!(port = %config.port, error = %e, "Failed to open serial port");
                self.state = ConnectionState::Failed;
                return Err(e);
            }
        };

        let reader_port = match port.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                self.state = ConnectionState::Failed;
                return Err(HardwareError::initialization_failed(format!(
                    "cannot clone serial handle: {e}"
                )));
            }
        };

        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let shutdown = Arc::clone(&self.shutdown);
        let framing = self.framing;
        let endpoint = self.endpoint.clone();
        let spawned = thread::Builder::new()
            .name(format!("gstream-serial-reader {endpoint}"))
            .spawn(move || read_loop(reader_port, tx, framing, shutdown));
        if let Err(e) = spawned {
            self.state = ConnectionState::Failed;
            return Err(HardwareError::initialization_failed(format!(
                "cannot spawn reader thread: {e}"
            )));
        }

        self.port = Some(Arc::new(Mutex::new(port)));
        self.responses = Some(rx);
        self.state = ConnectionState::Open;
        info!(port = %self.endpoint, baud_rate = config.baud_rate, "Serial port connected");
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.state.is_open() {
            return Err(HardwareError::not_open(self.state));
        }
        let port = self
            .port
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| HardwareError::not_open(self.state))?;

        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut port = port
                .lock()
                .map_err(|_| HardwareError::communication("serial port lock poisoned"))?;
            port
                .write_all(&data)
                .and_then(|()| port.flush())
                .map_err(write_error)
        })
        .await
        .map_err(|e| HardwareError::other(format!("serial write task failed: {e}")))??;

        trace!(len = bytes.len(), "Serial write complete");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes> {
        if !self.state.is_open() {
            return Err(HardwareError::not_open(self.state));
        }
        let responses = self
            .responses
            .as_mut()
            .ok_or_else(|| HardwareError::not_open(ConnectionState::Unopened))?;

        let next = responses.recv().await;
        match next {
            Some(chunk) => Ok(chunk),
            None => {
                warn!(port = %self.endpoint, "Serial reader stopped");
                self.state = ConnectionState::Failed;
                Err(HardwareError::disconnected(self.endpoint.clone()))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stop_reader();
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Closed;
        }
        info!(port = %self.endpoint, "Serial port closed");
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        let info = DeviceInfo::new("Serial", self.endpoint.clone());
        match self.baud_rate {
            Some(baud_rate) => info.with_baud_rate(baud_rate),
            None => info,
        }
    }
}

/// Reader thread body: forward response chunks until shutdown, the channel
/// closes, or the transport fails.
fn read_loop(
    mut port: Box<dyn SerialPort>,
    tx: mpsc::Sender<Bytes>,
    framing: ResponseFraming,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut framer = ResponseFramer::new(framing);

    while !shutdown.load(Ordering::Relaxed) {
        let n = match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Serial read failed");
                break;
            }
        };

        trace!(len = n, "Serial read");
        for chunk in framer.push(&buf[..n]) {
            if tx.blocking_send(chunk).is_err() {
                debug!("Response channel closed, stopping serial reader");
                return;
            }
        }
    }
}

/// Map a failed write. The port timeout bounds writes as well as reads.
fn write_error(e: io::Error) -> HardwareError {
    match e.kind() {
        ErrorKind::TimedOut => HardwareError::timeout(SERIAL_READ_TIMEOUT_MS),
        _ => HardwareError::Io(e),
    }
}

/// List the serial ports reported by the operating system.
///
/// # Errors
///
/// Returns an error if port enumeration fails.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| HardwareError::communication(format!("cannot enumerate ports: {e}")))?;

    let mut ports: Vec<PortInfo> = ports
        .into_iter()
        .map(|port| PortInfo {
            description: describe_port_type(&port.port_type),
            name: port.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{product} ({:04x}:{:04x})", usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "serial".to_string(),
    }
}
