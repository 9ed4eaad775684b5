//! Completion events and their owning trackers
//!
//! Every asynchronous queue operation yields an [`Event`]. The queue
//! backend stamps the event at enqueue time and again at completion, so
//! the elapsed time between the two is the per-operation timing sample
//! (the analog of device profiling counters on real bindings).
//!
//! [`EventTracker`] is the owning wrapper the orchestration layer uses:
//! one outstanding operation per tracker, armed exactly once per round,
//! retired exactly once after completion. Dropping an armed tracker
//! releases the handle, so a panic or early return cannot leak one.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{DeviceError, Result};

/// Execution status of an asynchronous device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Submitted, not yet complete
    Pending,
    /// Finished on the device
    Complete,
}

#[derive(Debug)]
struct EventState {
    queued: Instant,
    inner: Mutex<EventInner>,
}

#[derive(Debug)]
struct EventInner {
    status: EventStatus,
    completed: Option<Instant>,
}

/// Shared completion handle for one enqueued operation.
///
/// Clones share state: a wait-set can reference an event whose owning
/// tracker is elsewhere. The underlying resources are released when the
/// last clone is dropped.
#[derive(Debug, Clone)]
pub struct Event {
    state: Arc<EventState>,
}

impl Event {
    /// Create a pending event stamped with the current instant.
    ///
    /// For queue backend implementations.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            state: Arc::new(EventState {
                queued: Instant::now(),
                inner: Mutex::new(EventInner {
                    status: EventStatus::Pending,
                    completed: None,
                }),
            }),
        }
    }

    /// Mark the operation complete, stamping the completion instant.
    ///
    /// For queue backend implementations. Idempotent: a second call does
    /// not move the completion timestamp.
    pub fn mark_complete(&self) {
        let mut inner = self.state.inner.lock().expect("event state poisoned");
        if inner.completed.is_none() {
            inner.status = EventStatus::Complete;
            inner.completed = Some(Instant::now());
        }
    }

    /// Non-blocking status query.
    #[must_use]
    pub fn status(&self) -> EventStatus {
        self.state.inner.lock().expect("event state poisoned").status
    }

    /// Whether the operation has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status() == EventStatus::Complete
    }

    /// Elapsed time from enqueue to completion.
    ///
    /// `None` while the operation is still pending.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.state.inner.lock().expect("event state poisoned");
        inner.completed.map(|done| done - self.state.queued)
    }
}

/// Owning wrapper around one outstanding asynchronous operation.
///
/// Created inactive. [`arm`](Self::arm) activates it when an operation is
/// submitted; [`retire`](Self::retire) extracts the timing sample and
/// releases the handle exactly once. Arming an active tracker or retiring
/// an inactive one is a protocol violation.
#[derive(Debug)]
pub struct EventTracker {
    label: String,
    event: Option<Event>,
    completions: u64,
}

impl EventTracker {
    /// Create an inactive tracker with a diagnostic label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            event: None,
            completions: 0,
        }
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether an operation is currently outstanding.
    #[must_use]
    pub fn active(&self) -> bool {
        self.event.is_some()
    }

    /// Number of completions retired through this tracker.
    #[must_use]
    pub fn completions(&self) -> u64 {
        self.completions
    }

    /// Attach a freshly enqueued operation.
    ///
    /// # Errors
    ///
    /// Protocol violation if the previous operation has not been retired.
    pub fn arm(&mut self, event: Event) -> Result<()> {
        if self.event.is_some() {
            return Err(DeviceError::protocol_violation(format!(
                "tracker {} armed while still active",
                self.label
            )));
        }
        self.event = Some(event);
        Ok(())
    }

    /// Non-blocking completion query.
    ///
    /// Returns `false` for an inactive tracker (nothing is pending), so
    /// poll loops only ever wait on armed trackers.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.event.as_ref().is_some_and(Event::is_complete)
    }

    /// Borrow the outstanding event, if any.
    #[must_use]
    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    /// Extract the timing sample and release the handle.
    ///
    /// Timing is read before release, since release invalidates the
    /// handle.
    ///
    /// # Errors
    ///
    /// Protocol violation if the tracker is inactive or the operation has
    /// not completed yet.
    pub fn retire(&mut self) -> Result<Duration> {
        let event = self.event.take().ok_or_else(|| {
            DeviceError::protocol_violation(format!("retire of inactive tracker {}", self.label))
        })?;
        let Some(elapsed) = event.elapsed() else {
            // Put it back: the operation is still in flight.
            self.event = Some(event);
            return Err(DeviceError::protocol_violation(format!(
                "retire of tracker {} before completion",
                self.label
            )));
        };
        self.completions += 1;
        tracing::trace!(
            "retired {} (completion #{}, {} us)",
            self.label,
            self.completions,
            elapsed.as_micros()
        );
        Ok(elapsed)
    }
}
