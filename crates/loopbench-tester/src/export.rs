//! Statistics export
//!
//! One JSON document per profiling run: per-port ordered sample lists,
//! the per-round kernel samples, and the running totals. Exactly one
//! entry per completed round, ordered by round index — no gaps, no
//! duplicates.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::stats::{KernelSample, TransferSample};
use crate::tester::LoopbackTester;

/// Per-port section of the stats document.
#[derive(Debug, Serialize)]
pub struct PortStats<'a> {
    /// Port name
    pub name: &'a str,
    /// Transfer direction
    pub direction: &'static str,
    /// Ordered per-round transfer samples
    pub samples: &'a [TransferSample],
}

/// Cumulative totals section.
#[derive(Debug, Serialize)]
pub struct TotalsRecord {
    /// Completed rounds
    pub rounds: u64,
    /// Cumulative kernel time, microseconds
    pub kernel_us: u64,
    /// Cumulative write time, microseconds
    pub write_us: u64,
    /// Cumulative read time, microseconds
    pub read_us: u64,
    /// Cumulative metadata-read time, microseconds
    pub size_read_us: u64,
    /// Total bytes staged host-to-device
    pub bytes_written: u64,
    /// Total bytes staged device-to-host
    pub bytes_read: u64,
}

/// The exported stats document.
#[derive(Debug, Serialize)]
pub struct StatsDocument<'a> {
    /// Circular-buffer capacity per port, in elements
    pub buffer_size: usize,
    /// Number of port pairs
    pub width: usize,
    /// Input port sections, in port order
    pub input_ports: Vec<PortStats<'a>>,
    /// Per-round kernel samples
    pub kernel: &'a [KernelSample],
    /// Output port sections, in port order
    pub output_ports: Vec<PortStats<'a>>,
    /// Cumulative totals
    pub totals: TotalsRecord,
}

fn micros(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl LoopbackTester {
    /// Assemble the stats document from the current run state.
    #[must_use]
    pub fn stats_document(&self) -> StatsDocument<'_> {
        fn section(port: &crate::port::Port) -> PortStats<'_> {
            PortStats {
                name: port.name(),
                direction: port.direction().as_str(),
                samples: port.samples(),
            }
        }
        let totals = self.totals();
        StatsDocument {
            buffer_size: self.payload_size(),
            width: self.width(),
            input_ports: self.inputs().iter().map(section).collect(),
            kernel: self.kernel_samples(),
            output_ports: self.outputs().iter().map(section).collect(),
            totals: TotalsRecord {
                rounds: totals.rounds(),
                kernel_us: micros(totals.kernel_time()),
                write_us: micros(totals.write_time()),
                read_us: micros(totals.read_time()),
                size_read_us: micros(totals.size_read_time()),
                bytes_written: totals.bytes_written(),
                bytes_read: totals.bytes_read(),
            },
        }
    }

    /// Write the stats document to `path` as pretty-printed JSON.
    ///
    /// Called periodically during a sweep (best-effort flushing) and once
    /// at the end.
    ///
    /// # Errors
    ///
    /// Filesystem or serialization failure.
    pub fn dump_stats(&self, path: &Path) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &self.stats_document())?;
        debug!("stats written to {}", path.display());
        Ok(())
    }
}
