//! Loopback device for hardware-free streaming.
//!
//! The loopback device accepts every write and, after a short fixed delay,
//! answers with the same acknowledgment framing a real controller uses
//! (`ok\r\n`). It lets the flow-control engine run end to end without a
//! machine attached, which is what the `/dev/null` port identifier selects.
//!
//! A [`LoopbackHandle`] observes the device from the outside: it records
//! every written command, tracks how many commands were outstanding at once,
//! can inject arbitrary responses (telemetry, manual acknowledgments), and
//! can make the next write fail.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use gstream_core::Config;
use gstream_core::constants::{LOOPBACK_ACK_DELAY_MS, LOOPBACK_PORT, LOOPBACK_RESPONSE};
use gstream_protocol::AckDetector;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::traits::{ConnectionState, DeviceAdapter};
use crate::types::DeviceInfo;
use crate::{HardwareError, Result};

/// Observations shared between the device and its handle.
#[derive(Debug, Default)]
struct LoopbackLog {
    /// Every command written, in order.
    written: Vec<String>,

    /// Commands written but not yet acknowledged.
    outstanding: usize,

    /// Highest value `outstanding` ever reached.
    max_outstanding: usize,

    /// Acknowledgments delivered through `recv()`.
    acks_delivered: usize,

    /// Refuse the next write with a transport error.
    fail_next_write: bool,
}

/// Self-acknowledging device for testing and development.
///
/// # Examples
///
/// ```
/// use gstream_core::Config;
/// use gstream_hardware::loopback::LoopbackDevice;
/// use gstream_hardware::traits::DeviceAdapter;
///
/// #[tokio::main]
/// async fn main() -> gstream_hardware::Result<()> {
///     let (mut device, handle) = LoopbackDevice::new();
///     device.open(&Config::default()).await?;
///
///     device.write(b"G28\n").await?;
///     let response = device.recv().await?;
///
///     assert_eq!(&response[..], b"ok\r\n");
///     assert_eq!(handle.written(), vec!["G28\n".to_string()]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct LoopbackDevice {
    /// Current connection state.
    state: ConnectionState,

    /// Delay between a write and its synthesized acknowledgment.
    ack_delay: Duration,

    /// Whether writes are acknowledged automatically.
    auto_ack: bool,

    /// Deadlines of synthesized acknowledgments, oldest first.
    scheduled_acks: VecDeque<Instant>,

    /// Responses injected through the handle.
    injected_rx: mpsc::UnboundedReceiver<Bytes>,

    /// Keeps the injection channel open even after every handle is dropped.
    _injected_tx: mpsc::UnboundedSender<Bytes>,

    /// Used to recognize acknowledgments among injected responses.
    detector: AckDetector,

    log: Arc<Mutex<LoopbackLog>>,
}

impl LoopbackDevice {
    /// Create a new loopback device with the default acknowledgment delay.
    ///
    /// Returns a tuple of (LoopbackDevice, LoopbackHandle) where the handle
    /// observes and drives the device from tests.
    pub fn new() -> (Self, LoopbackHandle) {
        let (injected_tx, injected_rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(LoopbackLog::default()));

        let device = Self {
            state: ConnectionState::Unopened,
            ack_delay: Duration::from_millis(LOOPBACK_ACK_DELAY_MS),
            auto_ack: true,
            scheduled_acks: VecDeque::new(),
            injected_rx,
            _injected_tx: injected_tx.clone(),
            detector: AckDetector::new(),
            log: Arc::clone(&log),
        };

        let handle = LoopbackHandle { injected_tx, log };

        (device, handle)
    }

    /// Use a custom acknowledgment delay.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    /// Disable automatic acknowledgments.
    ///
    /// Acknowledgments must then be injected with [`LoopbackHandle::ack`].
    pub fn without_auto_ack(mut self) -> Self {
        self.auto_ack = false;
        self
    }

    fn log(&self) -> MutexGuard<'_, LoopbackLog> {
        lock_log(&self.log)
    }

    fn record_delivery(&self, response: &[u8]) {
        if self.detector.on_response(response) {
            let mut log = self.log();
            log.outstanding = log.outstanding.saturating_sub(1);
            log.acks_delivered += 1;
        }
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new().0
    }
}

impl DeviceAdapter for LoopbackDevice {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn open(&mut self, _config: &Config) -> Result<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            state if state.is_terminal() => Err(HardwareError::initialization_failed(format!(
                "loopback device is {state}"
            ))),
            _ => {
                self.state = ConnectionState::Open;
                debug!("Loopback device open");
                Ok(())
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.state.is_open() {
            return Err(HardwareError::not_open(self.state));
        }

        {
            let mut log = self.log();
            if std::mem::take(&mut log.fail_next_write) {
                debug!("Loopback write failed on request");
                return Err(HardwareError::communication("loopback write failed"));
            }
            log.written.push(String::from_utf8_lossy(bytes).into_owned());
            log.outstanding += 1;
            log.max_outstanding = log.max_outstanding.max(log.outstanding);
        }

        if self.auto_ack {
            self.scheduled_acks.push_back(Instant::now() + self.ack_delay);
        }

        trace!(len = bytes.len(), "Loopback write accepted");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes> {
        if !self.state.is_open() {
            return Err(HardwareError::not_open(self.state));
        }

        let next_ack = self.scheduled_acks.front().copied();

        tokio::select! {
            injected = self.injected_rx.recv() => {
                let response = injected.ok_or_else(|| HardwareError::disconnected(LOOPBACK_PORT))?;
                self.record_delivery(&response);
                Ok(response)
            }
            _ = sleep_until(next_ack.unwrap_or_else(Instant::now)), if next_ack.is_some() => {
                self.scheduled_acks.pop_front();
                let response = Bytes::from_static(LOOPBACK_RESPONSE);
                self.record_delivery(&response);
                trace!("Loopback synthesized acknowledgment");
                Ok(response)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.scheduled_acks.clear();
        self.state = ConnectionState::Closed;
        debug!("Loopback device closed");
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo::new("Loopback", LOOPBACK_PORT)
    }
}

/// Handle for observing and driving a loopback device.
///
/// The handle can be cloned and shared across tasks.
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    injected_tx: mpsc::UnboundedSender<Bytes>,
    log: Arc<Mutex<LoopbackLog>>,
}

impl LoopbackHandle {
    /// Every command written to the device, in order.
    pub fn written(&self) -> Vec<String> {
        lock_log(&self.log).written.clone()
    }

    /// Number of writes accepted so far.
    pub fn write_count(&self) -> usize {
        lock_log(&self.log).written.len()
    }

    /// Highest number of commands that were written but not yet acknowledged.
    ///
    /// A flow controller that respects the one-command-in-flight rule keeps
    /// this at 1.
    pub fn max_outstanding(&self) -> usize {
        lock_log(&self.log).max_outstanding
    }

    /// Acknowledgments delivered by the device so far.
    pub fn acks_delivered(&self) -> usize {
        lock_log(&self.log).acks_delivered
    }

    /// Inject raw response bytes, delivered by the next `recv()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has been dropped.
    pub fn inject(&self, response: impl Into<Bytes>) -> Result<()> {
        self.injected_tx
            .send(response.into())
            .map_err(|_| HardwareError::disconnected(LOOPBACK_PORT))
    }

    /// Inject an acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has been dropped.
    pub fn ack(&self) -> Result<()> {
        self.inject(Bytes::from_static(LOOPBACK_RESPONSE))
    }

    /// Make the next write fail with a communication error. The failed
    /// write is not recorded.
    pub fn fail_next_write(&self) {
        lock_log(&self.log).fail_next_write = true;
    }
}

/// The log only holds plain data, so a poisoned lock is still consistent.
fn lock_log(log: &Mutex<LoopbackLog>) -> MutexGuard<'_, LoopbackLog> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
