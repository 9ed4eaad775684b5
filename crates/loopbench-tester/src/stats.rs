//! Bandwidth statistics aggregation
//!
//! Two granularities: per-round samples (one entry per completed round,
//! ordered by round index, exported as JSON) and running totals from
//! which the end-of-run bandwidth figures are derived.

use std::time::Duration;

use serde::Serialize;

const MIB: f64 = 1_048_576.0;

/// One retired transfer operation of one port in one round.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSample {
    /// Round index the sample belongs to
    pub round: u64,
    /// Tracker label (port name plus transfer slot)
    pub label: String,
    /// Enqueue-to-completion time in microseconds
    pub duration_us: u64,
}

/// One kernel invocation.
#[derive(Debug, Clone, Serialize)]
pub struct KernelSample {
    /// Round index
    pub round: u64,
    /// Kernel duration in microseconds
    pub duration_us: u64,
}

/// Per-phase durations retired from one port in one round.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseDurations {
    /// Host-to-device data transfer time
    pub write: Duration,
    /// Device-to-host data transfer time
    pub read: Duration,
    /// Metadata (size) readback time
    pub size_read: Duration,
}

impl PhaseDurations {
    /// Fold another port's phase durations into this one.
    pub fn accumulate(&mut self, other: PhaseDurations) {
        self.write += other.write;
        self.read += other.read;
        self.size_read += other.size_read;
    }
}

/// Everything one completed round contributes to the totals.
#[derive(Debug, Clone, Copy)]
pub struct RoundSample {
    /// Kernel invocation duration
    pub kernel: Duration,
    /// Summed phase durations across all ports
    pub phases: PhaseDurations,
    /// Bytes staged host-to-device
    pub bytes_written: u64,
    /// Bytes staged device-to-host
    pub bytes_read: u64,
    /// Metadata bytes read back
    pub meta_bytes: u64,
}

/// Running totals over a profiling run. Totals only grow; there is no
/// mid-run reset.
#[derive(Debug, Default, Clone)]
pub struct BandwidthTotals {
    rounds: u64,
    kernel: Duration,
    write: Duration,
    read: Duration,
    size_read: Duration,
    bytes_written: u64,
    bytes_read: u64,
    meta_bytes: u64,
}

impl BandwidthTotals {
    /// Append one completed round.
    pub fn record_round(&mut self, sample: RoundSample) {
        self.rounds += 1;
        self.kernel += sample.kernel;
        self.write += sample.phases.write;
        self.read += sample.phases.read;
        self.size_read += sample.phases.size_read;
        self.bytes_written += sample.bytes_written;
        self.bytes_read += sample.bytes_read;
        self.meta_bytes += sample.meta_bytes;
    }

    /// Completed rounds.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Cumulative kernel time.
    #[must_use]
    pub fn kernel_time(&self) -> Duration {
        self.kernel
    }

    /// Cumulative write time.
    #[must_use]
    pub fn write_time(&self) -> Duration {
        self.write
    }

    /// Cumulative read time.
    #[must_use]
    pub fn read_time(&self) -> Duration {
        self.read
    }

    /// Cumulative metadata-read time.
    #[must_use]
    pub fn size_read_time(&self) -> Duration {
        self.size_read
    }

    /// Total bytes staged host-to-device.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Total bytes staged device-to-host.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Kernel-phase bandwidth over written bytes, MiB/s.
    #[must_use]
    pub fn kernel_bandwidth(&self) -> Option<f64> {
        self.rate(self.bytes_written, self.kernel)
    }

    /// Write-phase bandwidth, MiB/s.
    #[must_use]
    pub fn write_bandwidth(&self) -> Option<f64> {
        self.rate(self.bytes_written, self.write)
    }

    /// Read-phase bandwidth, MiB/s.
    #[must_use]
    pub fn read_bandwidth(&self) -> Option<f64> {
        self.rate(self.bytes_read, self.read)
    }

    /// Metadata-read bandwidth, MiB/s.
    #[must_use]
    pub fn size_read_bandwidth(&self) -> Option<f64> {
        self.rate(self.meta_bytes, self.size_read)
    }

    /// `bytes` over `time` in MiB/s. No samples or a zero denominator
    /// yields `None` rather than a fabricated rate.
    #[allow(clippy::cast_precision_loss)]
    fn rate(&self, bytes: u64, time: Duration) -> Option<f64> {
        if self.rounds == 0 || time.is_zero() {
            return None;
        }
        Some((bytes as f64 / MIB) / time.as_secs_f64())
    }
}
