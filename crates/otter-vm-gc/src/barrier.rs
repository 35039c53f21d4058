//! Write barriers for incremental marking
//!
//! A marker may trace cells while the mutator is rewriting them. Two barriers
//! keep that sound:
//! - Insertion barrier (Dijkstra-style): the target of a stored pointer is shaded
//! - Deletion barrier (Yuasa-style / snapshot-at-the-beginning): the target of
//!   an overwritten pointer is shaded
//!
//! Shaded cells are pushed onto a shared buffer the marker drains.

use crate::object::GcHeader;
use crate::tagged::GcRef;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Write barrier buffer for batching barrier operations
///
/// Shared between the mutator (producer) and the marker (consumer).
pub struct WriteBarrierBuffer {
    /// Cells shaded by the mutator that the marker has not scanned yet
    entries: Mutex<Vec<GcRef>>,
    /// Buffer size at which the marker should be nudged
    max_size: usize,
}

impl WriteBarrierBuffer {
    /// Create a new buffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new buffer with specific capacity
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    /// Add an entry to the buffer
    ///
    /// Returns true if buffer is full and should be flushed
    pub fn push(&self, cell: GcRef) -> bool {
        let mut entries = self.entries.lock();
        entries.push(cell);
        entries.len() >= self.max_size
    }

    /// Take all entries from the buffer
    pub fn drain(&self) -> Vec<GcRef> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for WriteBarrierBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Marking state shared by the heap and the marker
pub struct MarkingState {
    active: CachePadded<AtomicBool>,
    buffer: WriteBarrierBuffer,
    /// Barrier pushes that found the buffer at or past its size
    overflows: AtomicUsize,
}

impl MarkingState {
    /// Create an idle marking state
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            active: CachePadded::new(AtomicBool::new(false)),
            buffer: WriteBarrierBuffer::with_capacity(buffer_capacity),
            overflows: AtomicUsize::new(0),
        }
    }

    /// Whether a marking cycle is in progress
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Barrier buffer
    pub fn buffer(&self) -> &WriteBarrierBuffer {
        &self.buffer
    }

    /// Note that a barrier push filled the buffer. The push itself is never
    /// dropped; the marker picks the count up on its next step.
    pub(crate) fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Overflows since the last call
    pub(crate) fn take_overflows(&self) -> usize {
        self.overflows.swap(0, Ordering::Relaxed)
    }
}

/// Insertion barrier
///
/// Called when a pointer to `to` is stored into any cell during marking.
/// Returns true if the buffer is full.
#[inline]
pub fn insertion_barrier(to: &GcHeader, to_ref: GcRef, buffer: &WriteBarrierBuffer) -> bool {
    if to.shade() {
        return buffer.push(to_ref);
    }
    false
}

/// Deletion barrier
///
/// Called when a pointer to `old` is overwritten during marking, so that
/// everything reachable when marking started stays reachable.
#[inline]
pub fn deletion_barrier(old: &GcHeader, old_ref: GcRef, buffer: &WriteBarrierBuffer) -> bool {
    if old.shade() {
        return buffer.push(old_ref);
    }
    false
}
