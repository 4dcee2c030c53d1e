//! Acknowledgment-gated streaming of line-oriented commands.
//!
//! The input sink reassembles producer chunks into lines. The engine queues
//! them, keeps exactly one command in flight on the device, and reports each
//! fully acknowledged batch back to the producer as a drain notification.
//!
//! - [`queue`]: the transmission queue state machine
//! - [`engine`]: the event loop tying queue and device together
//! - [`boundary`]: producer (with line reassembly), consumer and control handles

pub mod boundary;
pub mod engine;
pub mod error;
pub mod queue;

pub use boundary::{EngineHandle, EngineStats, InputSink, ResponseStream};
pub use engine::{Engine, EngineBuilder, OpenCallback};
pub use error::{EngineError, Result};
pub use queue::{Dispatch, DispatchState, TransmissionQueue};
