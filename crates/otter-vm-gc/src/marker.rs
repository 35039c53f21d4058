//! Incremental tri-color marker
//!
//! The marker is the tracing observer of the heap. It may run on its own
//! thread, interleaved with mutator steps, and scans every pointer word of a
//! cell without interpreting the cell's instance type. It never reclaims
//! memory; freeing cells is the owner's decision.

use crate::heap::GcHeap;
use crate::object::MarkColor;
use crate::tagged::{GcRef, decode_pointer};
use std::collections::VecDeque;
use std::sync::Arc;

/// Statistics of one marking cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkStats {
    /// Cells scanned and blackened
    pub marked: usize,
    /// Number of incremental steps taken
    pub steps: usize,
    /// Cells handed over by the write barrier
    pub barrier_entries: usize,
    /// Barrier pushes that reached `GcConfig::barrier_buffer_size`
    pub barrier_overflows: usize,
}

/// Incremental marker over a shared heap
pub struct Marker {
    heap: Arc<GcHeap>,
    worklist: VecDeque<GcRef>,
    stats: MarkStats,
}

impl Marker {
    /// Create an idle marker
    pub fn new(heap: Arc<GcHeap>) -> Self {
        Self {
            heap,
            worklist: VecDeque::new(),
            stats: MarkStats::default(),
        }
    }

    /// Whether this marker's heap is currently marking
    pub fn is_active(&self) -> bool {
        self.heap.marking().is_active()
    }

    /// Begin a cycle: whiten everything, enable barriers, shade the roots.
    pub fn start(&mut self, roots: &[GcRef]) {
        self.heap.reset_marks();
        self.worklist.clear();
        self.stats = MarkStats::default();
        self.heap.marking().buffer().drain();
        self.heap.marking().take_overflows();
        self.heap.marking().set_active(true);

        for &root in roots {
            if self.heap.shade(root) {
                self.worklist.push_back(root);
            }
        }

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            roots = roots.len(),
            live = self.heap.live_count(),
            "marking started"
        );
    }

    /// Scan up to `budget` gray cells. Returns true when no gray cell is left.
    pub fn step(&mut self, budget: usize) -> bool {
        self.step_observing(budget, |_, _, _| {})
    }

    /// Like [`Marker::step`], reporting each scanned cell as
    /// `(cell, tag, words)` exactly as the marker read it.
    pub fn step_observing<F>(&mut self, budget: usize, mut observe: F) -> bool
    where
        F: FnMut(GcRef, u8, &[u64]),
    {
        let handed_over = self.heap.marking().buffer().drain();
        self.stats.barrier_entries += handed_over.len();
        self.stats.barrier_overflows += self.heap.marking().take_overflows();
        self.worklist.extend(handed_over);

        let mut scanned = 0;
        while scanned < budget {
            let Some(cell) = self.worklist.pop_front() else {
                break;
            };
            // Freed since it was shaded
            let Ok((tag, words)) = self.heap.load_all(cell) else {
                continue;
            };
            observe(cell, tag, &words);

            for &word in &words {
                if let Some((target, _)) = decode_pointer(word) {
                    if self.heap.shade(target) {
                        self.worklist.push_back(target);
                    }
                }
            }
            self.heap.set_mark(cell, MarkColor::Black);
            self.stats.marked += 1;
            scanned += 1;
        }
        self.stats.steps += 1;
        self.worklist.is_empty() && self.heap.marking().buffer().is_empty()
    }

    /// Run the cycle to completion and disable barriers.
    pub fn finish(&mut self) -> MarkStats {
        while !self.step(usize::MAX) {}
        self.heap.marking().set_active(false);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            marked = self.stats.marked,
            steps = self.stats.steps,
            barrier_entries = self.stats.barrier_entries,
            barrier_overflows = self.stats.barrier_overflows,
            "marking finished"
        );
        self.stats
    }

    /// Whether a cell is black
    pub fn is_marked(&self, cell: GcRef) -> bool {
        matches!(self.heap.mark(cell), Ok(MarkColor::Black))
    }
}
