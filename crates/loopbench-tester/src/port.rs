//! Circular-buffer ports
//!
//! A port is one directional channel between a host-resident and a
//! device-resident buffer of equal element capacity. The logical data
//! window is `[tail, head)` modulo capacity; a window that crosses the
//! physical end of the buffer is staged as two contiguous DMA segments,
//! each tracked by its own event slot. `head == tail` may mean empty or
//! full; the port never disambiguates — callers track logical length
//! themselves, and an equal-cursor window stages nothing here.
//!
//! Alongside the data buffer every port carries a 1-element metadata
//! mirror the kernel writes each round: the consumed element count for
//! inputs, the advanced head cursor for outputs.

use loopbench_device::{
    BufferId, DeviceError, DeviceQueue, Event, EventTracker, MemoryBank,
};
use tracing::trace;

use crate::error::Result;
use crate::stats::{PhaseDurations, TransferSample};

/// Metadata mirror width in bytes.
pub const META_BYTES: usize = 4;

/// Transfer direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Input,
    /// Device to host
    Output,
}

impl Direction {
    /// Lower-case name for labels and export.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Number of logical elements in the window `[tail, head)` mod `capacity`.
#[must_use]
pub fn window_len(tail: usize, head: usize, capacity: usize) -> usize {
    (head + capacity - tail) % capacity
}

/// Decompose the window `[tail, head)` mod `capacity` into at most two
/// physically contiguous `(start, len)` segments: `[tail, capacity)` then
/// the wrapped remainder `[0, head)`.
#[must_use]
pub fn wrap_segments(
    tail: usize,
    head: usize,
    capacity: usize,
) -> ((usize, usize), Option<(usize, usize)>) {
    if head >= tail {
        ((tail, head - tail), None)
    } else {
        ((tail, capacity - tail), Some((0, head)))
    }
}

/// One directional circular-buffer channel.
#[derive(Debug)]
pub struct Port {
    name: String,
    direction: Direction,
    elem_bytes: usize,
    capacity: usize,
    head: usize,
    tail: usize,
    host: Vec<u8>,
    meta_host: [u8; META_BYTES],
    data_buffer: BufferId,
    meta_buffer: BufferId,
    size_tracker: EventTracker,
    data_trackers: [EventTracker; 2],
    samples: Vec<TransferSample>,
}

impl Port {
    /// Allocate host and device storage for `capacity` elements.
    ///
    /// # Errors
    ///
    /// Allocation failure is a setup-time precondition violation and is
    /// fatal to the caller.
    pub fn new(
        queue: &mut dyn DeviceQueue,
        name: impl Into<String>,
        direction: Direction,
        elem_bytes: usize,
        capacity: usize,
        bank: MemoryBank,
    ) -> Result<Self> {
        let name = name.into();
        let data_buffer = queue.alloc_buffer(capacity * elem_bytes, bank)?;
        let meta_buffer = queue.alloc_buffer(META_BYTES, bank)?;
        trace!(
            "port {name} ({}): {capacity} x {elem_bytes} bytes on bank {}",
            direction.as_str(),
            bank.0
        );
        Ok(Self {
            size_tracker: EventTracker::new(format!("{name} size")),
            data_trackers: [
                EventTracker::new(format!("{name} data[0]")),
                EventTracker::new(format!("{name} data[1]")),
            ],
            name,
            direction,
            elem_bytes,
            capacity,
            head: 0,
            tail: 0,
            host: vec![0u8; capacity * elem_bytes],
            meta_host: [0u8; META_BYTES],
            data_buffer,
            meta_buffer,
            samples: Vec::new(),
        })
    }

    /// Port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transfer direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Element capacity of the circular buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Element size in bytes.
    #[must_use]
    pub fn elem_bytes(&self) -> usize {
        self.elem_bytes
    }

    /// Current head cursor.
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Current tail cursor.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Device buffer handle for kernel argument binding.
    #[must_use]
    pub fn data_buffer(&self) -> BufferId {
        self.data_buffer
    }

    /// Metadata buffer handle for kernel argument binding.
    #[must_use]
    pub fn meta_buffer(&self) -> BufferId {
        self.meta_buffer
    }

    /// Host-side buffer contents.
    #[must_use]
    pub fn host(&self) -> &[u8] {
        &self.host
    }

    /// Mutable host-side buffer, for staging payload data.
    pub fn host_mut(&mut self) -> &mut [u8] {
        &mut self.host
    }

    /// Per-round transfer samples recorded so far.
    #[must_use]
    pub fn samples(&self) -> &[TransferSample] {
        &self.samples
    }

    /// Set both cursors (start-of-round reset).
    pub fn set_cursors(&mut self, tail: usize, head: usize) {
        debug_assert!(tail < self.capacity && head < self.capacity);
        self.tail = tail;
        self.head = head;
    }

    /// Record the device-reported head after a round.
    pub fn set_head(&mut self, head: usize) {
        debug_assert!(head < self.capacity);
        self.head = head;
    }

    /// Hardware-reported metadata value from the last round: consumed
    /// element count for inputs, advanced head for outputs.
    #[must_use]
    pub fn reported_meta(&self) -> u32 {
        u32::from_ne_bytes(self.meta_host)
    }

    /// True once every armed size tracker has completed.
    #[must_use]
    pub fn meta_settled(&self) -> bool {
        !self.size_tracker.active() || self.size_tracker.is_complete()
    }

    /// True once every armed data tracker has completed.
    #[must_use]
    pub fn data_settled(&self) -> bool {
        self.data_trackers
            .iter()
            .all(|t| !t.active() || t.is_complete())
    }

    fn ensure_round_retired(&self) -> Result<()> {
        let busy = self
            .data_trackers
            .iter()
            .chain(std::iter::once(&self.size_tracker))
            .find(|t| t.active());
        if let Some(t) = busy {
            return Err(DeviceError::protocol_violation(format!(
                "port {}: staging while {} is still outstanding",
                self.name,
                t.label()
            ))
            .into());
        }
        Ok(())
    }

    /// Stage the host-to-device transfer of `[tail, head)` mod capacity.
    ///
    /// A wrapped window issues two physical transfers, slots 0 and 1.
    /// Returns the completion events for the kernel wait-set. Equal
    /// cursors stage nothing.
    ///
    /// # Errors
    ///
    /// Protocol violation if the previous round's trackers are still
    /// active — the caller did not wait for the round to retire.
    pub fn stage_write(
        &mut self,
        queue: &mut dyn DeviceQueue,
        tail: usize,
        head: usize,
    ) -> Result<Vec<Event>> {
        self.ensure_round_retired()?;
        self.set_cursors(tail, head);
        self.stage_segments(queue, tail, head, true)
    }

    /// Stage the device-to-host transfer of the freshly produced range
    /// `[old_head, new_head)` mod capacity. Returns the number of
    /// elements staged.
    ///
    /// # Errors
    ///
    /// Protocol violation if a previous data transfer is still tracked.
    pub fn stage_read(
        &mut self,
        queue: &mut dyn DeviceQueue,
        old_head: usize,
        new_head: usize,
    ) -> Result<usize> {
        for t in &self.data_trackers {
            if t.active() {
                return Err(DeviceError::protocol_violation(format!(
                    "port {}: read staged while {} is still outstanding",
                    self.name,
                    t.label()
                ))
                .into());
            }
        }
        self.stage_segments(queue, old_head, new_head, false)?;
        Ok(window_len(old_head, new_head, self.capacity))
    }

    fn stage_segments(
        &mut self,
        queue: &mut dyn DeviceQueue,
        from: usize,
        to: usize,
        host_to_device: bool,
    ) -> Result<Vec<Event>> {
        let (first, second) = wrap_segments(from, to, self.capacity);
        let mut events = Vec::with_capacity(2);
        for (slot, segment) in [Some(first), second].into_iter().enumerate() {
            let Some((start, len)) = segment else { continue };
            if len == 0 {
                continue;
            }
            let lo = start * self.elem_bytes;
            let hi = lo + len * self.elem_bytes;
            let event = if host_to_device {
                queue.enqueue_write(self.data_buffer, lo, &self.host[lo..hi])?
            } else {
                queue.enqueue_read(self.data_buffer, lo, &mut self.host[lo..hi], &[])?
            };
            self.data_trackers[slot].arm(event.clone())?;
            events.push(event);
        }
        trace!(
            "port {}: staged [{from}, {to}) as {} segment(s)",
            self.name,
            events.len()
        );
        Ok(events)
    }

    /// Stage the 1-element metadata readback, ordered after `wait_on`
    /// (the kernel completion event).
    ///
    /// # Errors
    ///
    /// Protocol violation if the previous metadata read was not retired.
    pub fn stage_meta_read(&mut self, queue: &mut dyn DeviceQueue, wait_on: &Event) -> Result<()> {
        let event = queue.enqueue_read(
            self.meta_buffer,
            0,
            &mut self.meta_host,
            std::slice::from_ref(wait_on),
        )?;
        self.size_tracker.arm(event)?;
        Ok(())
    }

    /// Retire every active tracker, tagging timing samples with
    /// `round`.
    ///
    /// Inactive trackers are skipped, so calling this on a port with no
    /// outstanding work is a no-op. Retiring a still-pending operation is
    /// a protocol violation.
    ///
    /// # Errors
    ///
    /// Protocol violation if any active tracker has not completed.
    pub fn release_events(&mut self, round: u64) -> Result<PhaseDurations> {
        let mut phases = PhaseDurations::default();

        if self.size_tracker.active() {
            let elapsed = self.size_tracker.retire()?;
            phases.size_read += elapsed;
            self.samples.push(TransferSample {
                round,
                label: self.size_tracker.label().to_string(),
                duration_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            });
        }

        for slot in 0..self.data_trackers.len() {
            if !self.data_trackers[slot].active() {
                continue;
            }
            let elapsed = self.data_trackers[slot].retire()?;
            match self.direction {
                Direction::Input => phases.write += elapsed,
                Direction::Output => phases.read += elapsed,
            }
            self.samples.push(TransferSample {
                round,
                label: self.data_trackers[slot].label().to_string(),
                duration_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            });
        }

        Ok(phases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopbench_device::SoftwareQueue;

    fn make_port(queue: &mut SoftwareQueue, direction: Direction, capacity: usize) -> Port {
        Port::new(queue, "test_port", direction, 4, capacity, MemoryBank(0)).unwrap()
    }

    #[test]
    fn window_len_handles_wraparound() {
        assert_eq!(window_len(0, 4095, 4096), 4095);
        assert_eq!(window_len(4000, 100, 4096), 196);
        assert_eq!(window_len(7, 7, 8), 0);
    }

    #[test]
    fn segments_cover_the_window_exactly() {
        // Every (tail, head) pair over a spread of capacities: the
        // decomposition covers [tail, cap) ∪ [0, head) with no overlap
        // and no gap.
        for capacity in [1usize, 2, 3, 5, 8, 16, 31] {
            for tail in 0..capacity {
                for head in 0..capacity {
                    let ((s0, l0), rest) = wrap_segments(tail, head, capacity);
                    let mut covered = vec![0u32; capacity];
                    for ix in s0..s0 + l0 {
                        covered[ix] += 1;
                    }
                    if let Some((s1, l1)) = rest {
                        assert_eq!(s1, 0, "wrapped remainder starts at zero");
                        for ix in s1..s1 + l1 {
                            covered[ix] += 1;
                        }
                    }
                    let expected = window_len(tail, head, capacity);
                    let total: u32 = covered.iter().sum();
                    assert_eq!(total as usize, expected, "cap {capacity} t {tail} h {head}");
                    assert!(
                        covered.iter().all(|&c| c <= 1),
                        "overlap at cap {capacity} t {tail} h {head}"
                    );
                    // Contiguity of the logical window.
                    for k in 0..expected {
                        assert_eq!(covered[(tail + k) % capacity], 1);
                    }
                }
            }
        }
    }

    #[test]
    fn wrapped_write_uses_both_tracker_slots() {
        let mut queue = SoftwareQueue::new();
        let mut port = make_port(&mut queue, Direction::Input, 8);
        let events = port.stage_write(&mut queue, 5, 4).unwrap();
        assert_eq!(events.len(), 2);
        assert!(port.data_settled());
        port.release_events(0).unwrap();
        assert_eq!(port.samples().len(), 2);
    }

    #[test]
    fn equal_cursors_stage_nothing() {
        let mut queue = SoftwareQueue::new();
        let mut port = make_port(&mut queue, Direction::Input, 8);
        let events = port.stage_write(&mut queue, 3, 3).unwrap();
        assert!(events.is_empty());
        assert!(port.data_settled());
    }

    #[test]
    fn double_stage_is_a_protocol_violation() {
        let mut queue = SoftwareQueue::new();
        let mut port = make_port(&mut queue, Direction::Input, 8);
        port.stage_write(&mut queue, 0, 7).unwrap();
        let err = port.stage_write(&mut queue, 0, 7).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TesterError::Device {
                source: DeviceError::ProtocolViolation { .. }
            }
        ));
    }

    #[test]
    fn release_with_no_active_trackers_is_a_noop() {
        let mut queue = SoftwareQueue::new();
        let mut port = make_port(&mut queue, Direction::Output, 8);
        let phases = port.release_events(3).unwrap();
        assert_eq!(phases.write, std::time::Duration::ZERO);
        assert_eq!(phases.read, std::time::Duration::ZERO);
        assert!(port.samples().is_empty());
        // And again: still a no-op.
        port.release_events(4).unwrap();
        assert!(port.samples().is_empty());
    }

    #[test]
    fn release_tags_samples_with_the_round_index() {
        let mut queue = SoftwareQueue::new();
        let mut port = make_port(&mut queue, Direction::Input, 8);
        port.stage_write(&mut queue, 0, 7).unwrap();
        port.release_events(11).unwrap();
        assert_eq!(port.samples().len(), 1);
        assert_eq!(port.samples()[0].round, 11);
        assert!(port.samples()[0].label.contains("data[0]"));
    }

    #[test]
    fn staged_write_lands_in_device_memory() {
        let mut queue = SoftwareQueue::new();
        let mut port = make_port(&mut queue, Direction::Input, 8);
        for (i, b) in port.host_mut().iter_mut().enumerate() {
            *b = i as u8;
        }
        port.stage_write(&mut queue, 2, 6).unwrap();
        let device = queue.buffer(port.data_buffer()).unwrap();
        assert_eq!(&device[8..24], &port.host()[8..24]);
        // Bytes outside the window were never transferred.
        assert_eq!(&device[0..8], &[0u8; 8]);
    }
}
