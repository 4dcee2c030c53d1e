//! The flow-control engine.
//!
//! One [`Engine`] owns the device connection and the transmission queue for
//! its whole lifetime. Producer chunks are reassembled into lines by the
//! [`InputSink`] before they reach it. All work happens on a single
//! task, triggered by one of three events:
//!
//! ```text
//!   InputSink / EngineHandle ──Input──┐
//!                                     │
//!   device.recv() ──response bytes────┼──> Engine::run (select loop)
//!                                     │        │
//!   ack timeout (optional) ───────────┘        ├──> device.write()
//!                                              ├──> ResponseStream ("<-ok")
//!                                              └──> drain notification
//! ```
//!
//! Events are handled one at a time, so an acknowledgment never triggers the
//! next dispatch from inside another handler's call stack.
//!
//! # Examples
//!
//! ```
//! use gstream_core::Config;
//! use gstream_engine::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         port: "/dev/null".to_string(),
//!         ..Config::default()
//!     };
//!
//!     let (engine, _handle, mut sink, mut responses) = Engine::builder(config).build();
//!     let task = tokio::spawn(engine.run());
//!
//!     sink.write("G28\nG90\n").await?;
//!     sink.drained().await?;
//!     sink.end().await?;
//!
//!     let stats = task.await??;
//!     assert_eq!(stats.acks, 2);
//!     assert_eq!(responses.recv().await.as_deref(), Some("<-ok\r\n"));
//!     Ok(())
//! }
//! ```

use std::fmt;

use bytes::Bytes;
use gstream_core::{Config, Error};
use gstream_hardware::{AnyDevice, ConnectionState, DeviceAdapter};
use gstream_protocol::AckDetector;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::boundary::{EngineHandle, EngineStats, Input, InputSink, ResponseStream, SharedGate};
use crate::error::Result;
use crate::queue::{Dispatch, TransmissionQueue};

/// Capacity of the input channel shared by sinks and handles.
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Callback fired once the device connection is open.
pub type OpenCallback = Box<dyn FnOnce() + Send + 'static>;

/// Builder for [`Engine`].
///
/// # Examples
///
/// ```
/// use gstream_core::Config;
/// use gstream_engine::Engine;
/// use gstream_hardware::AnyDevice;
///
/// let (device, loopback) = AnyDevice::loopback();
/// let (engine, handle, sink, responses) = Engine::builder(Config::default())
///     .with_device(device)
///     .on_open(|| println!("device open"))
///     .build();
/// ```
pub struct EngineBuilder {
    config: Config,
    device: Option<AnyDevice>,
    detector: AckDetector,
    on_open: Option<OpenCallback>,
}

impl EngineBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            device: None,
            detector: AckDetector::new(),
            on_open: None,
        }
    }

    /// Use this device instead of the one selected from the configuration.
    pub fn with_device(mut self, device: impl Into<AnyDevice>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Use a custom acknowledgment detector.
    pub fn with_ack_detector(mut self, detector: AckDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Callback fired once, after the device connection opens.
    pub fn on_open(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_open = Some(Box::new(callback));
        self
    }

    /// Build the engine and its boundary handles.
    ///
    /// Nothing happens until [`Engine::run`] is polled; input written before
    /// that is buffered and dispatched once the device is open.
    pub fn build(self) -> (Engine, EngineHandle, InputSink, ResponseStream) {
        let device = self
            .device
            .unwrap_or_else(|| AnyDevice::from_config(&self.config));

        let (input_tx, inbox) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (drain_tx, drain_rx) = watch::channel(0);
        let (stats_tx, stats_rx) = watch::channel(EngineStats::default());
        let (state_tx, state_rx) = watch::channel(device.state());
        let gate = SharedGate::default();

        let handle = EngineHandle::new(input_tx.downgrade(), gate.clone(), stats_rx, state_rx);
        let sink = InputSink::new(input_tx, gate, drain_rx);

        let engine = Engine {
            config: self.config,
            device,
            queue: TransmissionQueue::new(),
            detector: self.detector,
            inbox,
            input_closed: false,
            responses: responses_tx,
            drain_tx,
            stats_tx,
            state_tx,
            stats: EngineStats::default(),
            on_open: self.on_open,
            ack_deadline: None,
        };

        (engine, handle, sink, ResponseStream::new(responses_rx))
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("detector", &self.detector)
            .field("on_open", &self.on_open.is_some())
            .finish()
    }
}

/// Acknowledgment-gated streaming engine.
pub struct Engine {
    config: Config,
    device: AnyDevice,
    queue: TransmissionQueue,
    detector: AckDetector,

    /// Lines, commands and end-of-input from the handles.
    inbox: mpsc::Receiver<Input>,
    input_closed: bool,

    /// Formatted responses for the consumer.
    responses: mpsc::UnboundedSender<String>,

    drain_tx: watch::Sender<u64>,
    stats_tx: watch::Sender<EngineStats>,
    state_tx: watch::Sender<ConnectionState>,
    stats: EngineStats,

    on_open: Option<OpenCallback>,

    /// When the outstanding command counts as stalled. Cleared once reported.
    ack_deadline: Option<Instant>,
}

impl Engine {
    /// Start building an engine for `config`.
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Run the engine on a new Tokio task.
    pub fn spawn(self) -> JoinHandle<Result<EngineStats>> {
        tokio::spawn(self.run())
    }

    /// Open the device and stream until input has ended and the last batch
    /// is drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened, if a write fails or
    /// the connection is lost while running, or if closing it fails. Spurious
    /// acknowledgments, writes deferred until open and stalls are logged and
    /// counted instead.
    pub async fn run(mut self) -> Result<EngineStats> {
        self.open().await?;

        loop {
            if self.input_closed && self.queue.is_drained() {
                break;
            }

            let accept_input = !self.input_closed;
            let device_open = self.device.state().is_open();
            let ack_deadline = self.ack_deadline;

            tokio::select! {
                input = self.inbox.recv(), if accept_input => match input {
                    Some(Input::Lines(lines)) => self.on_lines(lines).await?,
                    Some(Input::Command(command)) => self.on_command(command).await?,
                    Some(Input::End) | None => self.on_end(),
                },
                response = self.device.recv(), if device_open => match response {
                    Ok(bytes) => self.on_response(bytes).await?,
                    Err(e) => {
                        error!(error = %e, "Device connection lost");
                        self.publish_state();
                        return Err(e.into());
                    }
                },
                _ = sleep_until(ack_deadline.unwrap_or_else(Instant::now)), if ack_deadline.is_some() => {
                    self.on_stall();
                }
                else => {
                    warn!("No input and no open device left, stopping");
                    break;
                }
            }
        }

        self.device.close().await?;
        self.publish_state();
        info!(
            lines_sent = self.stats.lines_sent,
            acks = self.stats.acks,
            drains = self.stats.drains,
            "Streaming finished"
        );
        Ok(self.stats)
    }

    async fn open(&mut self) -> Result<()> {
        let info = self.device.info();
        info!(
            device = %info.name,
            port = %self.config.port,
            baud_rate = self.config.baud_rate,
            "Opening device"
        );

        let opened = self.device.open(&self.config).await;
        self.publish_state();
        if let Err(e) = opened {
            error!(port = %self.config.port, error = %e, "Failed to open device");
            return Err(e.into());
        }

        info!(port = %self.config.port, "Device open");
        if let Some(callback) = self.on_open.take() {
            callback();
        }
        Ok(())
    }

    async fn on_lines(&mut self, lines: Vec<String>) -> Result<()> {
        trace!(lines = lines.len(), "Lines received");
        self.stats.lines_received += lines.len() as u64;
        self.publish_stats();

        if self.queue.enqueue(lines) {
            self.pump().await?;
        }
        Ok(())
    }

    async fn on_command(&mut self, command: String) -> Result<()> {
        debug!(command = %command.trim_end(), "Direct command queued");
        self.stats.lines_received += 1;
        self.publish_stats();

        if self.queue.enqueue(vec![command]) {
            self.pump().await?;
        }
        Ok(())
    }

    fn on_end(&mut self) {
        self.input_closed = true;
        info!(
            pending = self.queue.total() - self.queue.current(),
            "Input ended, finishing current batch"
        );
    }

    async fn on_response(&mut self, bytes: Bytes) -> Result<()> {
        if !self.detector.on_response(&bytes) {
            debug!(
                response = %String::from_utf8_lossy(&bytes).trim_end(),
                "Device response"
            );
            return Ok(());
        }

        if self
            .responses
            .send(AckDetector::format_response(&bytes))
            .is_err()
        {
            trace!("Response stream dropped");
        }

        match self.queue.on_acknowledge() {
            Ok(()) => {
                self.stats.acks += 1;
                self.ack_deadline = None;
                debug!(
                    current = self.queue.current(),
                    total = self.queue.total(),
                    "Acknowledged"
                );
                self.publish_stats();
                self.pump().await
            }
            Err(e) => {
                self.stats.spurious_acks += 1;
                warn!(
                    error = %e,
                    response = %String::from_utf8_lossy(&bytes).trim_end(),
                    "Ignoring acknowledgment"
                );
                self.publish_stats();
                Ok(())
            }
        }
    }

    fn on_stall(&mut self) {
        self.ack_deadline = None;
        self.stats.stalls += 1;
        let waited_ms = self.config.ack_timeout_ms.unwrap_or_default();
        warn!(
            error = %Error::DeviceUnresponsive { waited_ms },
            current = self.queue.current(),
            total = self.queue.total(),
            "Still waiting for acknowledgment"
        );
        self.publish_stats();
    }

    /// Dispatch the next line, or fire the drain notification.
    ///
    /// A write refused because the device is not open yet leaves the line at
    /// the queue head. Any other write failure ends the run: the device may
    /// have taken part of the line, so it is never resent.
    async fn pump(&mut self) -> Result<()> {
        let state = self.device.state();
        if !state.is_open() {
            debug!(error = %Error::NotConnected, %state, "Dispatch deferred");
            return Ok(());
        }

        match self.queue.try_dispatch_next() {
            Dispatch::Waiting => {}
            Dispatch::Drained => self.on_drained(),
            Dispatch::Write(command) => match self.device.write(command.as_bytes()).await {
                Ok(()) => {
                    self.queue.mark_sent();
                    self.stats.lines_sent += 1;
                    self.ack_deadline = self.config.ack_timeout().map(|t| Instant::now() + t);
                    debug!(
                        line = %command.trim_end(),
                        current = self.queue.current(),
                        total = self.queue.total(),
                        "Dispatched"
                    );
                    self.publish_stats();
                }
                Err(e) if e.is_not_open() => {
                    debug!(error = %Error::NotConnected, "Dispatch deferred");
                }
                Err(e) => {
                    error!(error = %e, line = %command.trim_end(), "Write failed");
                    self.publish_state();
                    return Err(e.into());
                }
            },
        }
        Ok(())
    }

    fn on_drained(&mut self) {
        self.stats.drains += 1;
        debug!(drains = self.stats.drains, "Batch drained");
        self.drain_tx.send_replace(self.stats.drains);
        self.publish_stats();
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats);
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.device.state());
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("queue", &self.queue)
            .field("input_closed", &self.input_closed)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
