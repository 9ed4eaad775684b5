//! Error types for device-session operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while driving the device execution queue.
///
/// The taxonomy is deliberate: setup errors (`ProgramLoad`,
/// `UnsupportedEmulationMode`, `AllocationFailed`) indicate environment
/// misconfiguration; `ProtocolViolation` indicates a bug in the caller's
/// state machine; everything else is a hardware-binding failure. None of
/// these are retryable.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device buffer allocation failed
    #[error("Allocation of {bytes} bytes failed: {reason}")]
    AllocationFailed {
        /// Requested size in bytes
        bytes: usize,
        /// Reason for failure
        reason: String,
    },

    /// Data transfer enqueue or completion failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// A kernel argument was rejected
    #[error("Invalid kernel argument at index {index}: {reason}")]
    InvalidArgument {
        /// Argument index
        index: u32,
        /// Reason for rejection
        reason: String,
    },

    /// Program artifact could not be loaded
    #[error("Failed to load program {path}: {reason}")]
    ProgramLoad {
        /// Resolved artifact path
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// The emulation-mode indicator named a mode this binding does not know
    #[error("Unsupported emulation mode: {mode}")]
    UnsupportedEmulationMode {
        /// The offending indicator value
        mode: String,
    },

    /// An operation was referenced against an unknown device buffer
    #[error("Unknown device buffer id {id}")]
    UnknownBuffer {
        /// Opaque buffer id
        id: u32,
    },

    /// The caller violated the event/enqueue protocol
    ///
    /// Examples: arming a tracker that is still active, retiring an
    /// inactive tracker, retiring a tracker whose operation has not
    /// completed. These are logic errors in the orchestration layer and
    /// are never silently ignored.
    #[error("Protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the violated rule
        reason: String,
    },
}

impl DeviceError {
    /// Create an allocation failure error
    pub fn allocation_failed(bytes: usize, reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            bytes,
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(index: u32, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            index,
            reason: reason.into(),
        }
    }

    /// Create a program load error
    pub fn program_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProgramLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }
}
