//! Handles through which the outside world talks to a running engine.
//!
//! - [`InputSink`]: the producer side. Reassembles raw text chunks into
//!   lines, signals end of input, and reports drain notifications.
//! - [`ResponseStream`]: the consumer side. Yields formatted response lines
//!   (`"<-" + raw response`).
//! - [`EngineHandle`]: direct commands and live observation of the engine.
//!
//! Drain is a readiness report, not a gate: writes are never refused because
//! the device is busy. A well-behaved producer waits for
//! [`InputSink::drained`] after each chunk that completed at least one line.
//!
//! Every sink clone and handle shares one input gate. Writes, direct
//! commands and end of input all go through its lock, so a line accepted
//! before `end()` always reaches the engine ahead of the end marker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use gstream_core::{Error, Result};
use gstream_hardware::ConnectionState;
use gstream_protocol::LineReassembler;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{trace, warn};

/// Messages from the handles to the engine loop.
#[derive(Debug)]
pub(crate) enum Input {
    /// Complete lines reassembled from producer chunks.
    Lines(Vec<String>),

    /// One complete command line.
    Command(String),

    /// End of input.
    End,
}

/// Input state shared by every sink and handle.
#[derive(Debug, Default)]
struct InputGate {
    reassembler: LineReassembler,
    ended: bool,
}

/// Shared, lockable [`InputGate`] plus a lock-free view of its `ended` flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedGate {
    state: Arc<Mutex<InputGate>>,
    closed: Arc<AtomicBool>,
}

impl SharedGate {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Counters maintained by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Complete lines reassembled from producer chunks, plus direct commands.
    pub lines_received: u64,

    /// Commands accepted by the device.
    pub lines_sent: u64,

    /// Acknowledgments matched to an outstanding command.
    pub acks: u64,

    /// Acknowledgments seen while no command was outstanding.
    pub spurious_acks: u64,

    /// Drain notifications fired.
    pub drains: u64,

    /// Commands that exceeded the acknowledgment timeout.
    pub stalls: u64,
}

/// Producer side of the engine.
///
/// Cloning yields another sink feeding the same engine and the same
/// reassembler. Ending input through any clone ends it for all of them;
/// dropping every clone without calling [`end`](Self::end) has the same
/// effect, except that a trailing fragment is dropped silently.
#[derive(Debug, Clone)]
pub struct InputSink {
    tx: mpsc::Sender<Input>,
    gate: SharedGate,
    drains: watch::Receiver<u64>,
}

impl InputSink {
    pub(crate) fn new(
        tx: mpsc::Sender<Input>,
        gate: SharedGate,
        drains: watch::Receiver<u64>,
    ) -> Self {
        Self { tx, gate, drains }
    }

    /// Feed a chunk of raw command text.
    ///
    /// Returns the number of complete lines the chunk finished. Only a chunk
    /// that completed a line leads to a drain notification; a chunk that only
    /// extends the unterminated fragment returns `0`.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCommand`] for a zero-length chunk (nothing is queued)
    /// - [`Error::InputClosed`] after [`end`](Self::end)
    /// - [`Error::EngineStopped`] if the engine is no longer running
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<usize> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let mut gate = self.gate.state.lock().await;
        if gate.ended {
            return Err(Error::InputClosed);
        }
        if self.tx.is_closed() {
            return Err(Error::EngineStopped);
        }

        let lines = gate.reassembler.feed(&chunk);
        let count = lines.len();
        trace!(
            chunk_len = chunk.len(),
            lines = count,
            pending = gate.reassembler.pending().len(),
            "Chunk received"
        );
        if count > 0 {
            self.tx
                .send(Input::Lines(lines))
                .await
                .map_err(|_| Error::EngineStopped)?;
        }
        Ok(count)
    }

    /// Signal end of input.
    ///
    /// The engine finishes the batch in flight and then stops. An
    /// unterminated trailing fragment is logged and discarded. Calling `end`
    /// more than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the engine is no longer running.
    pub async fn end(&self) -> Result<()> {
        let mut gate = self.gate.state.lock().await;
        if gate.ended {
            return Ok(());
        }
        gate.ended = true;
        self.gate.closed.store(true, Ordering::Release);

        if let Some(fragment) = gate.reassembler.take_pending() {
            warn!(
                fragment = %fragment,
                "Input ended with an unterminated line, discarding it"
            );
        }
        self.tx
            .send(Input::End)
            .await
            .map_err(|_| Error::EngineStopped)
    }

    /// Whether input has been ended.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Wait for the next drain notification.
    ///
    /// A drain fired since the previous call (or since this sink was created)
    /// completes immediately. Returns the total number of drains so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the engine stops without draining
    /// again.
    pub async fn drained(&mut self) -> Result<u64> {
        self.drains
            .changed()
            .await
            .map_err(|_| Error::EngineStopped)?;
        Ok(*self.drains.borrow_and_update())
    }

    /// Number of drains fired so far.
    pub fn drain_count(&self) -> u64 {
        *self.drains.borrow()
    }
}

/// Consumer side of the engine: formatted device responses.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ResponseStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Next response line, or `None` once the engine has stopped and every
    /// line has been read.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next response line if one is ready.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Control and observation handle.
///
/// The handle does not keep input open: once every [`InputSink`] is gone
/// the engine treats input as ended even if handles remain.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::WeakSender<Input>,
    gate: SharedGate,
    stats: watch::Receiver<EngineStats>,
    state: watch::Receiver<ConnectionState>,
}

impl EngineHandle {
    pub(crate) fn new(
        tx: mpsc::WeakSender<Input>,
        gate: SharedGate,
        stats: watch::Receiver<EngineStats>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            tx,
            gate,
            stats,
            state,
        }
    }

    /// Submit one command as a complete line.
    ///
    /// The command joins the same queue as producer input, so it is sent
    /// only when every earlier line has been acknowledged.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCommand`] for zero-length text (nothing is queued)
    /// - [`Error::InputClosed`] after input has ended
    /// - [`Error::EngineStopped`] if the engine is no longer running
    pub async fn send_command(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let gate = self.gate.state.lock().await;
        if gate.ended {
            return Err(Error::InputClosed);
        }
        let tx = self.tx.upgrade().ok_or(Error::InputClosed)?;
        tx.send(Input::Command(text.to_string()))
            .await
            .map_err(|_| Error::EngineStopped)
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        *self.stats.borrow()
    }

    /// Receiver notified whenever the counters change.
    pub fn subscribe_stats(&self) -> watch::Receiver<EngineStats> {
        self.stats.clone()
    }

    /// Current state of the device connection.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the device connection is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the connection fails or closes
    /// before opening, and [`Error::EngineStopped`] if the engine stops.
    pub async fn wait_open(&self) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| s.is_open() || s.is_terminal())
            .await
            .map_err(|_| Error::EngineStopped)?;
        if reached.is_open() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (InputSink, mpsc::Receiver<Input>, watch::Sender<u64>) {
        let (tx, rx) = mpsc::channel(4);
        let (drain_tx, drain_rx) = watch::channel(0);
        (
            InputSink::new(tx, SharedGate::default(), drain_rx),
            rx,
            drain_tx,
        )
    }

    fn lines(input: Option<Input>) -> Vec<String> {
        match input {
            Some(Input::Lines(lines)) => lines,
            other => panic!("expected lines, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chunk_is_rejected() {
        let (sink, mut rx, _drain) = sink();
        assert!(matches!(
            sink.write(Bytes::new()).await,
            Err(Error::EmptyCommand)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_reports_completed_lines() {
        let (sink, mut rx, _drain) = sink();

        assert_eq!(sink.write("G2").await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(sink.write("8\nG90\nG1").await.unwrap(), 2);
        assert_eq!(lines(rx.recv().await), vec!["G28", "G90"]);
    }

    #[tokio::test]
    async fn test_clones_share_the_fragment() {
        let (sink, mut rx, _drain) = sink();
        let second = sink.clone();

        assert_eq!(sink.write("M104 S").await.unwrap(), 0);
        assert_eq!(second.write("200\n").await.unwrap(), 1);
        assert_eq!(lines(rx.recv().await), vec!["M104 S200"]);
    }

    #[tokio::test]
    async fn test_write_after_end_is_rejected() {
        let (sink, mut rx, _drain) = sink();
        sink.write("G28\nG1 X").await.unwrap();
        sink.end().await.unwrap();
        sink.end().await.unwrap();

        assert!(sink.is_closed());
        assert!(matches!(sink.write("G90\n").await, Err(Error::InputClosed)));
        assert_eq!(lines(rx.recv().await), vec!["G28"]);
        assert!(matches!(rx.recv().await, Some(Input::End)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_end_from_clone_follows_accepted_writes() {
        let (sink, mut rx, _drain) = sink();
        let closer = sink.clone();

        let (written, ended) = tokio::join!(sink.write("G28\n"), closer.end());
        ended.unwrap();

        match written {
            Ok(count) => {
                assert_eq!(count, 1);
                assert_eq!(lines(rx.recv().await), vec!["G28"]);
            }
            Err(e) => assert!(matches!(e, Error::InputClosed)),
        }
        assert!(matches!(rx.recv().await, Some(Input::End)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_to_stopped_engine() {
        let (sink, rx, _drain) = sink();
        drop(rx);
        assert!(matches!(sink.write("G28\n").await, Err(Error::EngineStopped)));
        assert!(matches!(sink.write("G2").await, Err(Error::EngineStopped)));
    }

    #[tokio::test]
    async fn test_drained_reports_missed_notification() {
        let (mut sink, _rx, drain) = sink();
        drain.send_replace(1);

        assert_eq!(sink.drained().await.unwrap(), 1);
        assert_eq!(sink.drain_count(), 1);

        drop(drain);
        assert!(matches!(sink.drained().await, Err(Error::EngineStopped)));
    }

    #[tokio::test]
    async fn test_handle_without_sinks_is_closed_for_input() {
        let (tx, _rx) = mpsc::channel(4);
        let (_stats_tx, stats_rx) = watch::channel(EngineStats::default());
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Unopened);
        let handle = EngineHandle::new(
            tx.downgrade(),
            SharedGate::default(),
            stats_rx,
            state_rx,
        );
        drop(tx);

        assert!(matches!(handle.send_command("").await, Err(Error::EmptyCommand)));
        assert!(matches!(
            handle.send_command("M115").await,
            Err(Error::InputClosed)
        ));
        assert_eq!(handle.stats(), EngineStats::default());
    }

    #[tokio::test]
    async fn test_handle_rejects_commands_after_end() {
        let (tx, mut rx) = mpsc::channel(4);
        let (drain_tx, drain_rx) = watch::channel(0);
        let (_stats_tx, stats_rx) = watch::channel(EngineStats::default());
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let gate = SharedGate::default();
        let handle = EngineHandle::new(tx.downgrade(), gate.clone(), stats_rx, state_rx);
        let sink = InputSink::new(tx, gate, drain_rx);

        handle.send_command("M115").await.unwrap();
        sink.end().await.unwrap();

        assert!(matches!(
            handle.send_command("M115").await,
            Err(Error::InputClosed)
        ));
        assert!(matches!(rx.recv().await, Some(Input::Command(c)) if c == "M115"));
        assert!(matches!(rx.recv().await, Some(Input::End)));
        drop(drain_tx);
    }
}
