//! Device-session layer for the loopbench bandwidth profiler.
//!
//! Everything the transaction orchestrator needs from an accelerator is
//! behind one seam, [`DeviceQueue`]: buffer allocation, asynchronous
//! write/read transfers, kernel argument binding and kernel submission,
//! with completion expressed as pollable [`Event`] handles.
//!
//! # Layering
//!
//! ```text
//! orchestration (loopbench-tester)
//!   DeviceSession  — program identity + owned queue, no ambient state
//!     DeviceQueue  — out-of-order execution queue (trait)
//!       SoftwareQueue — in-process loopback device (CI / development)
//!       <hardware binding> — out of tree
//! ```
//!
//! # Concurrency model
//!
//! A single controlling thread drives the session. The device may reorder
//! independent queued operations; explicit wait-sets are the only
//! ordering guarantee, and the host observes completion by polling event
//! status. No timeouts, no cancellation: a hung operation blocks its poll
//! loop forever, which the orchestration layer surfaces as a deadlock
//! error when a round reports zero progress.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod backends;
mod error;
mod event;
mod queue;
mod session;

pub use backends::SoftwareQueue;
pub use error::{DeviceError, Result};
pub use event::{Event, EventStatus, EventTracker};
pub use queue::{BufferId, DeviceQueue, KernelArg, MemoryBank, DDR_BANK_COUNT};
pub use session::{artifact_path, BuildMode, DeviceSession, SessionConfig, ARTIFACT_EXTENSION};
