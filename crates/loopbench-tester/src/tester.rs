//! Transaction orchestrator
//!
//! [`LoopbackTester`] owns a fixed set of input/output port pairs plus a
//! device session and drives one transaction round at a time through an
//! explicit state machine:
//!
//! ```text
//! StageInputs -> Launch -> WaitMeta -> StageDataRead -> WaitData -> Retire
//! ```
//!
//! The two wait states are pure busy-polls: the tool benchmarks one
//! outstanding round at a time, so there is no pipelining and no yielding
//! (a deliberate trade of CPU for wait-loop latency; throughput numbers
//! are unaffected).

use std::time::Duration;

use loopbench_device::{DeviceSession, Event, EventTracker, KernelArg, MemoryBank};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info};

use crate::error::{Result, TesterError};
use crate::port::{window_len, Direction, Port, META_BYTES};
use crate::stats::{BandwidthTotals, KernelSample, PhaseDurations, RoundSample};

/// Kernel name convention: one compiled kernel per port-pair width.
#[must_use]
pub fn kernel_name(width: usize) -> String {
    format!("loopback{width}_kernel")
}

/// Draw a randomized full-capacity window: `tail` uniform in
/// `[0, capacity)`, `head = (tail + capacity - 1) mod capacity`.
pub fn randomized_window<R: Rng>(rng: &mut R, capacity: usize) -> (usize, usize) {
    let tail = rng.gen_range(0..capacity);
    (tail, (tail + capacity - 1) % capacity)
}

/// Tester construction parameters.
#[derive(Debug, Clone)]
pub struct TesterConfig {
    /// Number of parallel input/output port pairs
    pub width: usize,
    /// Circular-buffer capacity per port, in elements
    pub payload_size: usize,
    /// Element size in bytes
    pub elem_bytes: usize,
    /// Seed for the cursor randomizer (`None`: from entropy)
    pub seed: Option<u64>,
}

impl TesterConfig {
    /// Config with the shipped tool's element size (4-byte elements).
    #[must_use]
    pub fn new(width: usize, payload_size: usize) -> Self {
        Self {
            width,
            payload_size,
            elem_bytes: 4,
            seed: None,
        }
    }
}

/// Outcome of one completed round.
#[derive(Debug, Clone, Copy)]
pub struct RoundReport {
    /// Round index (0-based, monotonically increasing)
    pub round: u64,
    /// Elements staged for write across all input ports
    pub requested: u64,
    /// Elements the device reported consumed
    pub consumed: u64,
    /// Elements the device reported produced
    pub produced: u64,
    /// Kernel invocation duration
    pub kernel_time: Duration,
}

/// Explicit round state. Replaces the numeric program counters and
/// unstructured jumps of goto-style schedulers with one transition per
/// state, invoked from a single driving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    StageInputs,
    Launch,
    WaitMeta,
    StageDataRead,
    WaitData,
    Retire,
}

#[derive(Debug, Default, Clone, Copy)]
struct RoundScratch {
    requested: u64,
    consumed: u64,
    produced: u64,
    bytes_written: u64,
    bytes_read: u64,
}

/// The transaction orchestrator.
#[derive(Debug)]
pub struct LoopbackTester {
    session: DeviceSession,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    payload_size: usize,
    elem_bytes: usize,
    round: u64,
    kernel_tracker: EventTracker,
    kernel_samples: Vec<KernelSample>,
    totals: BandwidthTotals,
    wait_set: Vec<Event>,
    rng: StdRng,
    scratch: RoundScratch,
}

impl LoopbackTester {
    /// Allocate all port buffers and prime input payloads.
    ///
    /// Input buffers are spread over DDR banks round-robin, outputs
    /// offset by the width so a pair never contends for one bank.
    ///
    /// # Errors
    ///
    /// Propagates allocation failure (fatal setup error).
    ///
    /// # Panics
    ///
    /// If `width` is zero or `payload_size` is less than two — setup
    /// preconditions, not runtime conditions.
    pub fn new(mut session: DeviceSession, config: &TesterConfig) -> Result<Self> {
        assert!(config.width >= 1, "at least one port pair is required");
        assert!(
            config.payload_size >= 2,
            "payload_size must hold a non-empty window"
        );

        let mut inputs = Vec::with_capacity(config.width);
        let mut outputs = Vec::with_capacity(config.width);
        for ix in 0..config.width {
            inputs.push(Port::new(
                session.queue_mut(),
                format!("input_{ix}"),
                Direction::Input,
                config.elem_bytes,
                config.payload_size,
                MemoryBank::round_robin(ix),
            )?);
            outputs.push(Port::new(
                session.queue_mut(),
                format!("output_{ix}"),
                Direction::Output,
                config.elem_bytes,
                config.payload_size,
                MemoryBank::round_robin(ix + config.width),
            )?);
        }

        // Deterministic payload pattern; content only matters for
        // loopback validation, not for the bandwidth figures.
        for (ix, port) in inputs.iter_mut().enumerate() {
            let salt = ix as u8;
            for (j, byte) in port.host_mut().iter_mut().enumerate() {
                *byte = (j as u8).wrapping_mul(31).wrapping_add(salt);
            }
        }

        info!(
            "tester ready: {} port pair(s), {} x {} byte elements per port",
            config.width, config.payload_size, config.elem_bytes
        );

        Ok(Self {
            session,
            inputs,
            outputs,
            payload_size: config.payload_size,
            elem_bytes: config.elem_bytes,
            round: 0,
            kernel_tracker: EventTracker::new("kernel event"),
            kernel_samples: Vec::new(),
            totals: BandwidthTotals::default(),
            wait_set: Vec::new(),
            rng: match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
            scratch: RoundScratch::default(),
        })
    }

    /// Number of port pairs.
    #[must_use]
    pub fn width(&self) -> usize {
        self.inputs.len()
    }

    /// Circular-buffer capacity per port, in elements.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Completed rounds.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.round
    }

    /// Input ports, in order.
    #[must_use]
    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    /// Output ports, in order.
    #[must_use]
    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// Running totals.
    #[must_use]
    pub fn totals(&self) -> &BandwidthTotals {
        &self.totals
    }

    /// Per-round kernel samples, ordered by round index.
    #[must_use]
    pub fn kernel_samples(&self) -> &[KernelSample] {
        &self.kernel_samples
    }

    /// Drive one full transaction round.
    ///
    /// With `randomize`, every input window starts at a uniformly drawn
    /// tail (stress-testing wraparound handling); otherwise the steady
    /// state window `[0, payload_size - 1)` is written each round.
    ///
    /// # Errors
    ///
    /// Any binding-level failure, protocol violation or detected device
    /// deadlock. None of these are retryable; callers should terminate.
    pub fn run_round(&mut self, randomize: bool) -> Result<RoundReport> {
        self.scratch = RoundScratch::default();
        let mut phase = Phase::StageInputs;
        loop {
            phase = match phase {
                Phase::StageInputs => {
                    self.stage_inputs(randomize)?;
                    Phase::Launch
                }
                Phase::Launch => {
                    self.launch()?;
                    Phase::WaitMeta
                }
                Phase::WaitMeta => {
                    self.wait_meta();
                    Phase::StageDataRead
                }
                Phase::StageDataRead => {
                    self.stage_data_reads()?;
                    Phase::WaitData
                }
                Phase::WaitData => {
                    self.wait_data();
                    Phase::Retire
                }
                Phase::Retire => return self.retire(),
            };
        }
    }

    /// Stage all input windows and bind the full kernel argument set.
    fn stage_inputs(&mut self, randomize: bool) -> Result<()> {
        let cap = self.payload_size;
        self.wait_set.clear();

        let mut arg_ix = 0;
        for ix in 0..self.inputs.len() {
            let (tail, head) = if randomize {
                randomized_window(&mut self.rng, cap)
            } else {
                (0, cap - 1)
            };
            let queue = self.session.queue_mut();
            let events = self.inputs[ix].stage_write(queue, tail, head)?;
            self.wait_set.extend(events);

            let staged = window_len(tail, head, cap) as u64;
            self.scratch.requested += staged;
            self.scratch.bytes_written += staged * self.elem_bytes as u64;

            arg_ix = self.bind_port_args(arg_ix, ix, Direction::Input)?;
        }

        for ix in 0..self.outputs.len() {
            let (tail, head) = if randomize {
                let t = self.rng.gen_range(0..cap);
                (t, t)
            } else {
                (0, 0)
            };
            self.outputs[ix].set_cursors(tail, head);
            arg_ix = self.bind_port_args(arg_ix, ix, Direction::Output)?;
        }
        Ok(())
    }

    /// Bind one port's 5-tuple starting at `base`. The tuple order
    /// (data, meta, capacity, head, tail) and the inputs-then-outputs
    /// sequence are a contract with the compiled kernel; do not reorder.
    fn bind_port_args(&mut self, base: u32, ix: usize, direction: Direction) -> Result<u32> {
        let port = match direction {
            Direction::Input => &self.inputs[ix],
            Direction::Output => &self.outputs[ix],
        };
        let (data, meta) = (port.data_buffer(), port.meta_buffer());
        let (head, tail) = (port.head() as u32, port.tail() as u32);

        self.session.set_arg(base, KernelArg::Buffer(data))?;
        self.session.set_arg(base + 1, KernelArg::Buffer(meta))?;
        self.session
            .set_arg(base + 2, KernelArg::Scalar(self.payload_size as u32))?;
        self.session.set_arg(base + 3, KernelArg::Scalar(head))?;
        self.session.set_arg(base + 4, KernelArg::Scalar(tail))?;
        Ok(base + 5)
    }

    /// Submit the kernel over the collected wait-set and stage every
    /// port's metadata readback behind it.
    fn launch(&mut self) -> Result<()> {
        let kernel_event = self.session.enqueue_execution(&self.wait_set)?;
        self.kernel_tracker.arm(kernel_event.clone())?;
        self.wait_set.clear();

        for ix in 0..self.inputs.len() {
            let queue = self.session.queue_mut();
            self.inputs[ix].stage_meta_read(queue, &kernel_event)?;
        }
        for ix in 0..self.outputs.len() {
            let queue = self.session.queue_mut();
            self.outputs[ix].stage_meta_read(queue, &kernel_event)?;
        }
        debug!("round {}: kernel enqueued", self.round);
        Ok(())
    }

    /// Busy-poll until every metadata readback (and with it the kernel)
    /// has completed.
    fn wait_meta(&self) {
        while !self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .all(Port::meta_settled)
        {
            std::hint::spin_loop();
        }
    }

    /// Read device-reported progress and stage the produced output
    /// ranges. Detects a wedged device before staging anything further.
    fn stage_data_reads(&mut self) -> Result<()> {
        self.scratch.consumed = self
            .inputs
            .iter()
            .map(|p| u64::from(p.reported_meta()))
            .sum();

        for ix in 0..self.outputs.len() {
            let old_head = self.outputs[ix].head();
            let new_head = self.outputs[ix].reported_meta() as usize;
            if new_head >= self.payload_size {
                return Err(TesterError::HeadOutOfRange {
                    port: self.outputs[ix].name().to_string(),
                    head: new_head,
                    capacity: self.payload_size,
                });
            }
            let queue = self.session.queue_mut();
            let produced = self.outputs[ix].stage_read(queue, old_head, new_head)?;
            self.outputs[ix].set_head(new_head);
            self.scratch.produced += produced as u64;
            self.scratch.bytes_read += (produced * self.elem_bytes) as u64;
        }

        if self.scratch.requested > 0 && self.scratch.consumed == 0 && self.scratch.produced == 0 {
            error!(
                "round {}: requested {} elements, device consumed and produced nothing",
                self.round, self.scratch.requested
            );
            return Err(TesterError::DeviceDeadlock {
                round: self.round,
                requested: self.scratch.requested,
            });
        }
        Ok(())
    }

    /// Busy-poll until all output data transfers have completed.
    fn wait_data(&self) {
        while !self.outputs.iter().all(Port::data_settled) {
            std::hint::spin_loop();
        }
    }

    /// Release every port's events, record the kernel sample, fold the
    /// round into the totals.
    fn retire(&mut self) -> Result<RoundReport> {
        let mut phases = PhaseDurations::default();
        for ix in 0..self.inputs.len() {
            phases.accumulate(self.inputs[ix].release_events(self.round)?);
        }
        for ix in 0..self.outputs.len() {
            phases.accumulate(self.outputs[ix].release_events(self.round)?);
        }

        let kernel_time = self.kernel_tracker.retire()?;
        self.kernel_samples.push(KernelSample {
            round: self.round,
            duration_us: u64::try_from(kernel_time.as_micros()).unwrap_or(u64::MAX),
        });

        let meta_bytes = ((self.inputs.len() + self.outputs.len()) * META_BYTES) as u64;
        self.totals.record_round(RoundSample {
            kernel: kernel_time,
            phases,
            bytes_written: self.scratch.bytes_written,
            bytes_read: self.scratch.bytes_read,
            meta_bytes,
        });

        let report = RoundReport {
            round: self.round,
            requested: self.scratch.requested,
            consumed: self.scratch.consumed,
            produced: self.scratch.produced,
            kernel_time,
        };
        debug!(
            "round {} retired: requested {}, consumed {}, produced {}",
            report.round, report.requested, report.consumed, report.produced
        );
        self.round += 1;
        Ok(report)
    }
}
