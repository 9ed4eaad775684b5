//! Error types for the orchestration layer

use loopbench_device::DeviceError;
use thiserror::Error;

/// Result type alias for tester operations
pub type Result<T> = std::result::Result<T, TesterError>;

/// Errors raised while driving transaction rounds.
///
/// All of these are fatal to a profiling run: a lost or corrupted
/// in-flight transaction cannot be resumed without re-deriving buffer
/// state from the device, which this design does not attempt.
#[derive(Debug, Error)]
pub enum TesterError {
    /// Failure at the device-binding layer
    #[error(transparent)]
    Device {
        /// Underlying device error
        #[from]
        source: DeviceError,
    },

    /// A round requested work but the device made zero progress
    ///
    /// Distinct from setup and protocol errors: the hardware stopped
    /// responding. Never retried.
    #[error(
        "potential device deadlock at round {round}: requested {requested} elements, \
         consumed 0, produced 0"
    )]
    DeviceDeadlock {
        /// Round index that stalled
        round: u64,
        /// Elements staged for transfer in that round
        requested: u64,
    },

    /// The device reported a head cursor outside the buffer
    #[error("port {port}: device reported head {head} out of range (capacity {capacity})")]
    HeadOutOfRange {
        /// Port name
        port: String,
        /// Reported head index
        head: usize,
        /// Port capacity in elements
        capacity: usize,
    },

    /// Statistics export failed at the filesystem level
    #[error("failed to write statistics: {source}")]
    ExportIo {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Statistics export failed during serialization
    #[error("failed to serialize statistics: {source}")]
    ExportJson {
        /// Underlying serializer error
        #[from]
        source: serde_json::Error,
    },
}
