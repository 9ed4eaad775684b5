//! Execution-queue abstraction
//!
//! [`DeviceQueue`] is the seam between the orchestration layer and a
//! concrete hardware binding. The queue is out-of-order: host submission
//! order does not imply completion order, and the only ordering the host
//! may rely on is the wait-sets it passes explicitly. Completions are
//! consumed by polling event status, never by assuming FIFO delivery.

use std::path::Path;

use crate::error::Result;
use crate::event::Event;

/// Opaque handle to a device-resident buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    /// Create a handle. For queue backend implementations.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id value.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.0
    }
}

/// Placement hint for buffer allocation.
///
/// The target platform exposes four DDR banks; spreading port buffers
/// across them avoids serializing independent DMA channels on one
/// memory controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBank(pub u8);

/// Number of DDR banks on the target platform.
pub const DDR_BANK_COUNT: usize = 4;

impl MemoryBank {
    /// Bank for the `ix`-th allocation in a round-robin placement.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn round_robin(ix: usize) -> Self {
        Self((ix % DDR_BANK_COUNT) as u8)
    }
}

/// One bound kernel parameter.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg {
    /// A device buffer handle
    Buffer(BufferId),
    /// A 32-bit scalar (capacity, head, tail)
    Scalar(u32),
}

/// Asynchronous execution queue of one device session.
///
/// # Teardown order
///
/// Implementations must release the kernel before the program, and the
/// queue/context only after every buffer and event referencing them is
/// gone. In Rust terms: the queue owns kernel, program and buffers, and
/// its `Drop` runs after the orchestration layer has dropped all `Event`
/// clones it held.
pub trait DeviceQueue: std::fmt::Debug + Send {
    /// Load the compiled program artifact and select the named kernel.
    ///
    /// # Errors
    ///
    /// Returns a setup error if the artifact cannot be loaded or the
    /// kernel is not present in it. Setup errors are fatal to the caller.
    fn load_program(&mut self, artifact: &Path, kernel_name: &str) -> Result<()>;

    /// Allocate a device buffer of `bytes` bytes on the hinted bank.
    ///
    /// # Errors
    ///
    /// Allocation failure is a setup-time precondition violation, fatal
    /// to the caller; there is no retry path.
    fn alloc_buffer(&mut self, bytes: usize, bank: MemoryBank) -> Result<BufferId>;

    /// Stage an asynchronous host-to-device transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the target range is invalid or the enqueue is
    /// rejected by the binding.
    fn enqueue_write(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<Event>;

    /// Stage an asynchronous device-to-host transfer, ordered after every
    /// event in `wait`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source range is invalid or the enqueue is
    /// rejected by the binding.
    fn enqueue_read(
        &mut self,
        buffer: BufferId,
        offset: usize,
        dst: &mut [u8],
        wait: &[Event],
    ) -> Result<Event>;

    /// Bind kernel parameter `index`.
    ///
    /// Argument order is a contract with the compiled kernel: per port the
    /// 5-tuple (data buffer, metadata buffer, capacity, head, tail),
    /// inputs first, then outputs, in port order.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding rejects the argument.
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<()>;

    /// Submit one kernel invocation, ordered after every event in `wait`.
    ///
    /// Returns a single completion event covering the whole invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the bound arguments do not form a valid port
    /// descriptor set or the enqueue is rejected.
    fn enqueue_kernel(&mut self, wait: &[Event]) -> Result<Event>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_placement_wraps_over_four_banks() {
        assert_eq!(MemoryBank::round_robin(0), MemoryBank(0));
        assert_eq!(MemoryBank::round_robin(3), MemoryBank(3));
        assert_eq!(MemoryBank::round_robin(4), MemoryBank(0));
        assert_eq!(MemoryBank::round_robin(9), MemoryBank(1));
    }
}
