//! Software loopback backend
//!
//! An in-process device that honours the full queue protocol — opaque
//! buffers, completion events, the per-port kernel-argument convention —
//! while the "kernel" is a plain memory copy: each input port's logical
//! window is echoed into the paired output port's buffer, and the
//! metadata mirrors are updated the way the hardware loopback kernel
//! updates them (consumed count for inputs, advanced head for outputs).
//!
//! This is the CI and development stand-in for a real binding, in the
//! same role the software backend plays for the hardware driver it sits
//! beside: the orchestration layer runs unmodified against it, and every
//! protocol property is observable without a device.
//!
//! Execution is synchronous in submission order, so wait-set dependencies
//! are trivially satisfied; events still carry real enqueue/completion
//! timestamps so phase timing flows through the normal path.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{DeviceError, Result};
use crate::event::Event;
use crate::queue::{BufferId, DeviceQueue, KernelArg, MemoryBank};

/// Scalars + buffers per port descriptor tuple.
const ARGS_PER_PORT: u32 = 5;
/// Metadata mirror width in bytes.
const META_BYTES: usize = 4;

#[derive(Debug)]
struct ProgramImage {
    kernel_name: String,
    /// Artifact contents when the file exists; the simulation does not
    /// need them, but keeping the image mirrors a real binding's state.
    #[allow(dead_code)]
    data: Bytes,
}

/// Decoded per-port argument tuple.
#[derive(Debug, Clone, Copy)]
struct PortArgs {
    data: BufferId,
    meta: BufferId,
    capacity: usize,
    head: usize,
    tail: usize,
}

/// In-process loopback device queue.
#[derive(Debug, Default)]
pub struct SoftwareQueue {
    buffers: Vec<Vec<u8>>,
    args: BTreeMap<u32, KernelArg>,
    program: Option<ProgramImage>,
    stalled: bool,
    kernel_launches: u64,
}

impl SoftwareQueue {
    /// Create an empty queue with no program loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the synthetic kernel consume and produce nothing.
    ///
    /// Models a wedged device: the kernel invocation completes, but every
    /// metadata mirror reports zero progress. Used to exercise deadlock
    /// detection in the orchestration layer.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Number of kernel invocations executed so far.
    #[must_use]
    pub fn kernel_launches(&self) -> u64 {
        self.kernel_launches
    }

    /// Inspect a device buffer's contents. Diagnostic/test aid.
    #[must_use]
    pub fn buffer(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id.id() as usize).map(Vec::as_slice)
    }

    fn buffer_len(&self, id: BufferId) -> Result<usize> {
        self.buffers
            .get(id.id() as usize)
            .map(Vec::len)
            .ok_or(DeviceError::UnknownBuffer { id: id.id() })
    }

    fn check_range(&self, id: BufferId, offset: usize, len: usize) -> Result<()> {
        let total = self.buffer_len(id)?;
        match offset.checked_add(len) {
            Some(end) if end <= total => Ok(()),
            _ => Err(DeviceError::transfer_failed(format!(
                "range {offset}+{len} exceeds buffer {} of {total} bytes",
                id.id()
            ))),
        }
    }

    fn port_args(&self, base: u32) -> Result<PortArgs> {
        let arg = |ix: u32| {
            self.args
                .get(&ix)
                .copied()
                .ok_or_else(|| DeviceError::invalid_argument(ix, "argument not bound"))
        };
        let buffer = |ix: u32| match arg(ix)? {
            KernelArg::Buffer(id) => Ok(id),
            KernelArg::Scalar(_) => Err(DeviceError::invalid_argument(ix, "expected a buffer")),
        };
        let scalar = |ix: u32| match arg(ix)? {
            KernelArg::Scalar(v) => Ok(v as usize),
            KernelArg::Buffer(_) => Err(DeviceError::invalid_argument(ix, "expected a scalar")),
        };

        let decoded = PortArgs {
            data: buffer(base)?,
            meta: buffer(base + 1)?,
            capacity: scalar(base + 2)?,
            head: scalar(base + 3)?,
            tail: scalar(base + 4)?,
        };

        if decoded.capacity == 0 {
            return Err(DeviceError::invalid_argument(base + 2, "zero capacity"));
        }
        if decoded.head >= decoded.capacity || decoded.tail >= decoded.capacity {
            return Err(DeviceError::invalid_argument(
                base + 3,
                format!(
                    "cursors ({}, {}) out of range for capacity {}",
                    decoded.head, decoded.tail, decoded.capacity
                ),
            ));
        }
        if self.buffer_len(decoded.data)? % decoded.capacity != 0 {
            return Err(DeviceError::invalid_argument(
                base,
                "data buffer size is not a multiple of the capacity",
            ));
        }
        if self.buffer_len(decoded.meta)? < META_BYTES {
            return Err(DeviceError::invalid_argument(
                base + 1,
                "metadata buffer too small",
            ));
        }
        Ok(decoded)
    }

    fn write_meta(&mut self, port: PortArgs, value: u32) {
        let meta = &mut self.buffers[port.meta.id() as usize];
        meta[..META_BYTES].copy_from_slice(&value.to_ne_bytes());
    }

    /// Echo one input window into the paired output port.
    fn echo_pair(&mut self, input: PortArgs, output: PortArgs) -> Result<()> {
        let cap = input.capacity;
        if output.capacity != cap {
            return Err(DeviceError::transfer_failed(format!(
                "port pair capacity mismatch: {cap} vs {}",
                output.capacity
            )));
        }
        let span = (input.head + cap - input.tail) % cap;

        if self.stalled {
            self.write_meta(input, 0);
            self.write_meta(output, output.tail as u32);
            return Ok(());
        }

        let elem = self.buffer_len(input.data)? / cap;
        // Clone the source so the copy does not alias a mutable borrow of
        // the buffer table.
        let src = self.buffers[input.data.id() as usize].clone();
        let dst = &mut self.buffers[output.data.id() as usize];
        for k in 0..span {
            let s = ((input.tail + k) % cap) * elem;
            let d = ((output.tail + k) % cap) * elem;
            dst[d..d + elem].copy_from_slice(&src[s..s + elem]);
        }

        let new_head = (output.tail + span) % cap;
        self.write_meta(input, span as u32);
        self.write_meta(output, new_head as u32);
        trace!(
            "echoed {span} elements ({} bytes), output head -> {new_head}",
            span * elem
        );
        Ok(())
    }
}

impl DeviceQueue for SoftwareQueue {
    fn load_program(&mut self, artifact: &Path, kernel_name: &str) -> Result<()> {
        if kernel_name.is_empty() {
            return Err(DeviceError::program_load(artifact, "empty kernel name"));
        }
        // The simulation synthesizes the loopback kernel; the artifact is
        // read when present so a staged binary round-trips, but a missing
        // file is not an error here.
        let data = std::fs::read(artifact).map(Bytes::from).unwrap_or_default();
        debug!(
            "software queue loaded kernel {kernel_name} ({} artifact bytes)",
            data.len()
        );
        self.program = Some(ProgramImage {
            kernel_name: kernel_name.to_string(),
            data,
        });
        Ok(())
    }

    fn alloc_buffer(&mut self, bytes: usize, bank: MemoryBank) -> Result<BufferId> {
        if bytes == 0 {
            return Err(DeviceError::allocation_failed(0, "zero-sized buffer"));
        }
        let id = u32::try_from(self.buffers.len())
            .map_err(|_| DeviceError::allocation_failed(bytes, "buffer table exhausted"))?;
        self.buffers.push(vec![0u8; bytes]);
        debug!("allocated buffer {id}: {bytes} bytes on bank {}", bank.0);
        Ok(BufferId::new(id))
    }

    fn enqueue_write(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<Event> {
        self.check_range(buffer, offset, data.len())?;
        let event = Event::pending();
        self.buffers[buffer.id() as usize][offset..offset + data.len()].copy_from_slice(data);
        event.mark_complete();
        Ok(event)
    }

    fn enqueue_read(
        &mut self,
        buffer: BufferId,
        offset: usize,
        dst: &mut [u8],
        _wait: &[Event],
    ) -> Result<Event> {
        self.check_range(buffer, offset, dst.len())?;
        let event = Event::pending();
        dst.copy_from_slice(&self.buffers[buffer.id() as usize][offset..offset + dst.len()]);
        event.mark_complete();
        Ok(event)
    }

    fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<()> {
        if let KernelArg::Buffer(id) = arg {
            self.buffer_len(id)?;
        }
        self.args.insert(index, arg);
        Ok(())
    }

    fn enqueue_kernel(&mut self, _wait: &[Event]) -> Result<Event> {
        if self.program.is_none() {
            return Err(DeviceError::transfer_failed("no program loaded"));
        }
        let arg_count = u32::try_from(self.args.len())
            .map_err(|_| DeviceError::invalid_argument(0, "argument table overflow"))?;
        if arg_count == 0 || arg_count % (2 * ARGS_PER_PORT) != 0 {
            return Err(DeviceError::invalid_argument(
                arg_count,
                format!("{arg_count} bound arguments do not form input/output port tuples"),
            ));
        }
        let width = arg_count / (2 * ARGS_PER_PORT);

        let event = Event::pending();
        for pair in 0..width {
            let input = self.port_args(pair * ARGS_PER_PORT)?;
            let output = self.port_args((width + pair) * ARGS_PER_PORT)?;
            self.echo_pair(input, output)?;
        }
        self.kernel_launches += 1;
        event.mark_complete();
        trace!(
            "kernel launch #{} complete (width {width}, stalled: {})",
            self.kernel_launches,
            self.stalled
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn bind_pair(q: &mut SoftwareQueue, cap: u32, cursors: [(u32, u32); 2]) -> [PortArgs; 2] {
        let in_data = q.alloc_buffer(cap as usize * 4, MemoryBank(0)).unwrap();
        let in_meta = q.alloc_buffer(META_BYTES, MemoryBank(0)).unwrap();
        let out_data = q.alloc_buffer(cap as usize * 4, MemoryBank(1)).unwrap();
        let out_meta = q.alloc_buffer(META_BYTES, MemoryBank(1)).unwrap();

        let tuples = [(in_data, in_meta, cursors[0]), (out_data, out_meta, cursors[1])];
        for (p, (data, meta, (head, tail))) in tuples.iter().enumerate() {
            let base = p as u32 * ARGS_PER_PORT;
            q.set_arg(base, KernelArg::Buffer(*data)).unwrap();
            q.set_arg(base + 1, KernelArg::Buffer(*meta)).unwrap();
            q.set_arg(base + 2, KernelArg::Scalar(cap)).unwrap();
            q.set_arg(base + 3, KernelArg::Scalar(*head)).unwrap();
            q.set_arg(base + 4, KernelArg::Scalar(*tail)).unwrap();
        }
        [
            PortArgs {
                data: in_data,
                meta: in_meta,
                capacity: cap as usize,
                head: cursors[0].0 as usize,
                tail: cursors[0].1 as usize,
            },
            PortArgs {
                data: out_data,
                meta: out_meta,
                capacity: cap as usize,
                head: cursors[1].0 as usize,
                tail: cursors[1].1 as usize,
            },
        ]
    }

    fn loaded_queue() -> SoftwareQueue {
        let mut q = SoftwareQueue::new();
        q.load_program(Path::new("xclbin/loopback1_kernel.hw.xclbin"), "loopback1_kernel")
            .unwrap();
        q
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut q = loaded_queue();
        let buf = q.alloc_buffer(64, MemoryBank(0)).unwrap();
        let payload: Vec<u8> = (0..32u8).collect();

        let ev = q.enqueue_write(buf, 16, &payload).unwrap();
        assert!(ev.is_complete());

        let mut out = vec![0u8; 32];
        q.enqueue_read(buf, 16, &mut out, &[ev]).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn out_of_range_transfer_is_rejected() {
        let mut q = loaded_queue();
        let buf = q.alloc_buffer(16, MemoryBank(0)).unwrap();
        let err = q.enqueue_write(buf, 8, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, DeviceError::TransferFailed { .. }));
    }

    #[test]
    fn zero_allocation_is_rejected() {
        let mut q = loaded_queue();
        let err = q.alloc_buffer(0, MemoryBank(0)).unwrap_err();
        assert!(matches!(err, DeviceError::AllocationFailed { .. }));
    }

    #[test]
    fn kernel_echoes_a_plain_window() {
        let mut q = loaded_queue();
        let [input, output] = bind_pair(&mut q, 8, [(7, 0), (0, 0)]);

        let payload: Vec<u8> = (0..28u8).collect(); // 7 elements of 4 bytes
        q.enqueue_write(input.data, 0, &payload).unwrap();
        q.enqueue_kernel(&[]).unwrap();

        assert_eq!(&q.buffer(output.data).unwrap()[..28], &payload[..]);
        assert_eq!(words(q.buffer(input.meta).unwrap())[0], 7); // consumed
        assert_eq!(words(q.buffer(output.meta).unwrap())[0], 7); // new head
    }

    #[test]
    fn kernel_echoes_a_wrapped_window() {
        let mut q = loaded_queue();
        // tail 5, head 4 over capacity 8: segments [5,8) then [0,4).
        let [input, output] = bind_pair(&mut q, 8, [(4, 5), (2, 2)]);

        let full: Vec<u8> = (0..32u8).collect();
        q.enqueue_write(input.data, 0, &full).unwrap();
        q.enqueue_kernel(&[]).unwrap();

        let out = q.buffer(output.data).unwrap().to_vec();
        for k in 0..7usize {
            let s = ((5 + k) % 8) * 4;
            let d = ((2 + k) % 8) * 4;
            assert_eq!(out[d..d + 4], full[s..s + 4], "element {k}");
        }
        assert_eq!(words(q.buffer(input.meta).unwrap())[0], 7);
        assert_eq!(words(q.buffer(output.meta).unwrap())[0], (2 + 7) % 8);
    }

    #[test]
    fn stalled_kernel_reports_zero_progress() {
        let mut q = loaded_queue();
        q.set_stalled(true);
        let [input, output] = bind_pair(&mut q, 8, [(7, 0), (3, 3)]);

        q.enqueue_kernel(&[]).unwrap();
        assert_eq!(words(q.buffer(input.meta).unwrap())[0], 0);
        // Output head unchanged: still equal to its tail.
        assert_eq!(words(q.buffer(output.meta).unwrap())[0], 3);
    }

    #[test]
    fn kernel_without_program_is_rejected() {
        let mut q = SoftwareQueue::new();
        let err = q.enqueue_kernel(&[]).unwrap_err();
        assert!(matches!(err, DeviceError::TransferFailed { .. }));
    }

    #[test]
    fn ragged_argument_set_is_rejected() {
        let mut q = loaded_queue();
        let buf = q.alloc_buffer(32, MemoryBank(0)).unwrap();
        q.set_arg(0, KernelArg::Buffer(buf)).unwrap();
        let err = q.enqueue_kernel(&[]).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument { .. }));
    }

    #[test]
    fn binding_an_unknown_buffer_is_rejected() {
        let mut q = loaded_queue();
        let err = q.set_arg(0, KernelArg::Buffer(BufferId::new(42))).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownBuffer { id: 42 }));
    }

    #[test]
    fn artifact_contents_are_read_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loopback1_kernel.hw.xclbin");
        std::fs::write(&path, b"bitstream").unwrap();

        let mut q = SoftwareQueue::new();
        q.load_program(&path, "loopback1_kernel").unwrap();
        assert_eq!(q.program.as_ref().unwrap().data.as_ref(), b"bitstream");
    }
}
