//! Transaction orchestration for the loopbench bandwidth profiler.
//!
//! This crate is the host side of the measurement: circular-buffer
//! [`Port`]s with independent head/tail cursors, the [`LoopbackTester`]
//! round state machine that stages writes, launches the kernel, reads
//! back metadata and produced data, and retires completion events, and
//! the statistics layer that turns per-phase timings into bandwidth
//! figures and an exportable JSON document.
//!
//! # One round
//!
//! ```text
//! StageInputs   write [tail, head) per input, bind kernel args
//! Launch        kernel over the write wait-set, stage metadata reads
//! WaitMeta      busy-poll size trackers
//! StageDataRead produced ranges from reported heads (deadlock check)
//! WaitData      busy-poll data trackers
//! Retire        release events, record samples and totals
//! ```
//!
//! A wrapped window (`tail > head`) is staged as two contiguous DMA
//! segments; the randomize mode draws the tail uniformly each round to
//! stress exactly that path.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

mod error;
mod export;
mod port;
mod stats;
mod tester;

pub use error::{Result, TesterError};
pub use export::{PortStats, StatsDocument, TotalsRecord};
pub use port::{window_len, wrap_segments, Direction, Port, META_BYTES};
pub use stats::{BandwidthTotals, KernelSample, PhaseDurations, RoundSample, TransferSample};
pub use tester::{kernel_name, randomized_window, LoopbackTester, RoundReport, TesterConfig};
