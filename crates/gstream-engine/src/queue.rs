//! Transmission queue: the acknowledgment-gated flow controller.
//!
//! The queue holds one batch of raw command lines and a cursor. It never
//! talks to the device itself; the engine asks it what to do next, performs
//! the write, and reports back. Keeping the queue free of I/O makes the
//! exactly-one-in-flight rule a property of a plain state machine.
//!
//! # States
//!
//! - `Idle`: no command outstanding
//! - `AwaitingAck`: exactly one command written, acknowledgment not yet seen
//!
//! # Transitions
//!
//! ```text
//!            try_dispatch_next() + mark_sent()
//!   Idle ─────────────────────────────────────> AwaitingAck
//!    ^                                               │
//!    └──────────────── on_acknowledge() ─────────────┘
//! ```
//!
//! # Examples
//!
//! ```
//! use gstream_engine::queue::{Dispatch, DispatchState, TransmissionQueue};
//!
//! let mut queue = TransmissionQueue::new();
//! assert!(queue.enqueue(vec!["G28 ; home".to_string()]));
//!
//! assert_eq!(queue.try_dispatch_next(), Dispatch::Write("G28\n".to_string()));
//! queue.mark_sent();
//! assert_eq!(queue.state(), DispatchState::AwaitingAck);
//!
//! queue.on_acknowledge().unwrap();
//! assert_eq!(queue.try_dispatch_next(), Dispatch::Drained);
//! assert_eq!(queue.total(), 0);
//! ```

use std::fmt;

use gstream_core::{Error, Result};
use gstream_protocol::normalize;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Whether a command is outstanding on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// No command outstanding.
    #[default]
    Idle,

    /// One command written, waiting for its acknowledgment.
    AwaitingAck,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AwaitingAck => write!(f, "AwaitingAck"),
        }
    }
}

/// What the engine should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Write this normalized command, then call
    /// [`mark_sent`](TransmissionQueue::mark_sent) once the write succeeded.
    Write(String),

    /// The batch was fully acknowledged and has been reset; notify the
    /// producer.
    Drained,

    /// A command is outstanding; nothing may be written.
    Waiting,
}

/// Single-slot batch of command lines with a dispatch cursor.
///
/// Invariant: `current <= total`, and `current` only moves past a line once
/// the engine confirms the write with [`mark_sent`](Self::mark_sent).
#[derive(Debug, Default)]
pub struct TransmissionQueue {
    /// Raw lines of the current batch; normalized at dispatch.
    lines: Vec<String>,

    /// Index of the next line to send.
    current: usize,

    state: DispatchState,
}

impl TransmissionQueue {
    /// Create an empty, idle queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines to the batch tail.
    ///
    /// Returns `true` when new lines arrived while the queue is idle, meaning
    /// the caller should call [`try_dispatch_next`](Self::try_dispatch_next).
    /// An empty `lines` changes nothing and never asks for a dispatch, so no
    /// drain can fire without a line having been acknowledged.
    pub fn enqueue(&mut self, lines: Vec<String>) -> bool {
        if lines.is_empty() {
            return false;
        }
        self.lines.extend(lines);
        trace!(current = self.current, total = self.total(), state = %self.state, "Enqueued");
        self.state == DispatchState::Idle
    }

    /// Decide the next step.
    ///
    /// When the cursor has reached the end of the batch the counters are reset
    /// and [`Dispatch::Drained`] is returned. This method does not advance the
    /// cursor; a write that fails leaves the queue exactly as it was.
    pub fn try_dispatch_next(&mut self) -> Dispatch {
        if self.state == DispatchState::AwaitingAck {
            return Dispatch::Waiting;
        }

        match self.lines.get(self.current) {
            Some(raw) => Dispatch::Write(normalize(raw)),
            None => {
                self.lines.clear();
                self.current = 0;
                Dispatch::Drained
            }
        }
    }

    /// Record that the command returned by the last
    /// [`Dispatch::Write`] was accepted by the device.
    pub fn mark_sent(&mut self) {
        debug_assert!(self.current < self.total(), "mark_sent without a pending line");
        self.current = (self.current + 1).min(self.total());
        self.state = DispatchState::AwaitingAck;
    }

    /// Handle an acknowledgment from the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpuriousAcknowledge`] when no command is outstanding.
    /// The queue is left untouched in that case.
    pub fn on_acknowledge(&mut self) -> Result<()> {
        if self.state != DispatchState::AwaitingAck {
            return Err(Error::SpuriousAcknowledge);
        }
        self.state = DispatchState::Idle;
        Ok(())
    }

    /// Number of lines in the current batch.
    pub fn total(&self) -> usize {
        self.lines.len()
    }

    /// Index of the next line to send.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Whether lines of the current batch are still unsent.
    pub fn has_pending(&self) -> bool {
        self.current < self.total()
    }

    /// Idle with every line sent and acknowledged.
    pub fn is_drained(&self) -> bool {
        self.state == DispatchState::Idle && !self.has_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Send and acknowledge every remaining line, as the engine would with a
    /// device that accepts every write.
    fn send_and_ack(queue: &mut TransmissionQueue, written: &mut Vec<String>) {
        while let Dispatch::Write(cmd) = queue.try_dispatch_next() {
            written.push(cmd);
            queue.mark_sent();
            queue.on_acknowledge().unwrap();
        }
    }

    #[test]
    fn test_new_queue_is_idle_and_drained() {
        let queue = TransmissionQueue::new();
        assert_eq!(queue.state(), DispatchState::Idle);
        assert_eq!(queue.total(), 0);
        assert_eq!(queue.current(), 0);
        assert!(queue.is_drained());
    }

    #[test]
    fn test_only_one_command_in_flight() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(lines(&["G28", "G90"]));

        assert_eq!(queue.try_dispatch_next(), Dispatch::Write("G28\n".into()));
        queue.mark_sent();

        assert_eq!(queue.try_dispatch_next(), Dispatch::Waiting);
        assert_eq!(queue.try_dispatch_next(), Dispatch::Waiting);
        assert_eq!(queue.current(), 1);
    }

    #[test]
    fn test_enqueue_while_awaiting_ack_extends_batch() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(lines(&["G28"]));
        queue.try_dispatch_next();
        queue.mark_sent();

        assert!(!queue.enqueue(lines(&["G1 X10"])));
        assert_eq!(queue.total(), 2);

        queue.on_acknowledge().unwrap();
        assert_eq!(queue.try_dispatch_next(), Dispatch::Write("G1 X10\n".into()));
    }

    #[test]
    fn test_drain_fires_once_after_last_ack() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(lines(&["M104 S200", "G28", "G90"]));

        for _ in 0..3 {
            assert!(!queue.is_drained());
            assert!(matches!(queue.try_dispatch_next(), Dispatch::Write(_)));
            queue.mark_sent();
            assert_eq!(queue.try_dispatch_next(), Dispatch::Waiting);
            queue.on_acknowledge().unwrap();
        }

        assert_eq!(queue.try_dispatch_next(), Dispatch::Drained);
        assert_eq!(queue.total(), 0);
        assert_eq!(queue.current(), 0);
    }

    #[test]
    fn test_empty_enqueue_never_requests_dispatch() {
        let mut queue = TransmissionQueue::new();
        assert!(!queue.enqueue(Vec::new()));
        assert!(queue.is_drained());

        queue.enqueue(lines(&["G28"]));
        queue.try_dispatch_next();
        queue.mark_sent();
        assert!(!queue.enqueue(Vec::new()));
        assert_eq!(queue.total(), 1);

        queue.on_acknowledge().unwrap();
        assert_eq!(queue.try_dispatch_next(), Dispatch::Drained);
        assert!(!queue.enqueue(Vec::new()));
    }

    #[test]
    fn test_failed_write_does_not_advance() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(lines(&["G28"]));

        // Write refused: mark_sent is never called.
        assert_eq!(queue.try_dispatch_next(), Dispatch::Write("G28\n".into()));
        assert_eq!(queue.current(), 0);
        assert_eq!(queue.state(), DispatchState::Idle);

        assert_eq!(queue.try_dispatch_next(), Dispatch::Write("G28\n".into()));
    }

    #[test]
    fn test_spurious_ack_is_rejected_without_side_effects() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(lines(&["G28", "G90"]));

        let result = queue.on_acknowledge();

        assert!(matches!(result, Err(Error::SpuriousAcknowledge)));
        assert_eq!(queue.current(), 0);
        assert_eq!(queue.total(), 2);
        assert_eq!(queue.state(), DispatchState::Idle);
    }

    #[test]
    fn test_duplicate_ack_is_spurious() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(lines(&["G28", "G90"]));
        queue.try_dispatch_next();
        queue.mark_sent();

        queue.on_acknowledge().unwrap();
        assert!(queue.on_acknowledge().is_err());
        assert_eq!(queue.current(), 1);
        assert_eq!(queue.total(), 2);
    }

    #[rstest]
    #[case("  G1 X10 ; move", "G1 X10\n")]
    #[case(";comment", "\n")]
    #[case("", "\n")]
    #[case("M104 S200\r", "M104 S200\n")]
    fn test_lines_are_normalized_at_dispatch(#[case] raw: &str, #[case] expected: &str) {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(vec![raw.to_string()]);
        assert_eq!(queue.try_dispatch_next(), Dispatch::Write(expected.into()));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DispatchState::Idle.to_string(), "Idle");
        assert_eq!(DispatchState::AwaitingAck.to_string(), "AwaitingAck");
    }

    proptest! {
        /// Lines leave in arrival order whatever the enqueue/ack interleaving.
        #[test]
        fn prop_fifo_for_any_interleaving(
            batches in prop::collection::vec(
                prop::collection::vec("[A-Z][0-9]{1,3}", 0..5),
                1..8,
            ),
            acks_between in prop::collection::vec(0usize..4, 8),
        ) {
            let mut queue = TransmissionQueue::new();
            let mut written = Vec::new();
            let mut expected = Vec::new();

            for (i, batch) in batches.iter().enumerate() {
                expected.extend(batch.iter().map(|l| format!("{l}\n")));
                if queue.enqueue(batch.clone())
                    && let Dispatch::Write(cmd) = queue.try_dispatch_next()
                {
                    written.push(cmd);
                    queue.mark_sent();
                }
                for _ in 0..acks_between[i % acks_between.len()] {
                    if queue.on_acknowledge().is_ok()
                        && let Dispatch::Write(cmd) = queue.try_dispatch_next()
                    {
                        written.push(cmd);
                        queue.mark_sent();
                    }
                }
            }

            let _ = queue.on_acknowledge();
            send_and_ack(&mut queue, &mut written);

            prop_assert_eq!(written, expected);
            prop_assert!(queue.current() <= queue.total());
        }
    }
}
