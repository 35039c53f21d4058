//! Microtask queue for promise jobs.
//!
//! ## Ordering Guarantees
//!
//! - FIFO: first queued, first executed
//! - Reactions of one settlement are enqueued in registration order
//! - Jobs enqueued while draining run in the same drain
//!
//! Queued entries are job cells. The queue is a GC root set: a job cell is
//! reachable only through its queue entry once its reaction list is cleared.

use crate::layout::MicrotaskKind;
use otter_vm_gc::GcRef;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A queued job: the job cell and its kind at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Microtask {
    /// Job task cell
    pub cell: GcRef,
    /// Expected instance type of the cell
    pub kind: MicrotaskKind,
}

impl Microtask {
    /// Create a queue entry
    pub fn new(cell: GcRef, kind: MicrotaskKind) -> Self {
        Self { cell, kind }
    }
}

/// Sink that settlement hands jobs to
pub trait JobQueue: Send + Sync {
    /// Append a job at the tail
    fn enqueue(&self, task: Microtask);
}

/// Jobs enqueued so far, by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MicrotaskStats {
    /// Fulfill reaction jobs
    pub fulfill_reactions: u64,
    /// Reject reaction jobs
    pub reject_reactions: u64,
    /// Resolve-thenable jobs
    pub resolve_thenables: u64,
}

impl MicrotaskStats {
    /// Total jobs enqueued
    pub fn total(&self) -> u64 {
        self.fulfill_reactions + self.reject_reactions + self.resolve_thenables
    }
}

/// FIFO queue of promise jobs
pub struct MicrotaskQueue {
    queue: Mutex<VecDeque<Microtask>>,
    len: AtomicUsize,
    enqueued: [AtomicU64; 3],
}

impl MicrotaskQueue {
    /// Create new empty queue
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            enqueued: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    /// Take the next job
    pub fn dequeue(&self) -> Option<Microtask> {
        let task = self.queue.lock().pop_front();
        if task.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        task
    }

    /// Number of pending jobs
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard all pending jobs, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let len = queue.len();
        queue.clear();
        self.len.fetch_sub(len, Ordering::Relaxed);
        len
    }

    /// Counters of jobs enqueued since creation
    pub fn stats(&self) -> MicrotaskStats {
        MicrotaskStats {
            fulfill_reactions: self.enqueued[0].load(Ordering::Relaxed),
            reject_reactions: self.enqueued[1].load(Ordering::Relaxed),
            resolve_thenables: self.enqueued[2].load(Ordering::Relaxed),
        }
    }

    /// Report every pending job cell as a GC root
    pub fn trace_roots(&self, tracer: &mut dyn FnMut(GcRef)) {
        for task in self.queue.lock().iter() {
            tracer(task.cell);
        }
    }

    /// Pending job cells, oldest first
    pub fn roots(&self) -> Vec<GcRef> {
        let mut roots = Vec::with_capacity(self.len());
        self.trace_roots(&mut |cell| roots.push(cell));
        roots
    }
}

impl JobQueue for MicrotaskQueue {
    fn enqueue(&self, task: Microtask) {
        self.queue.lock().push_back(task);
        self.len.fetch_add(1, Ordering::Relaxed);
        let counter = match task.kind {
            MicrotaskKind::FulfillReaction => 0,
            MicrotaskKind::RejectReaction => 1,
            MicrotaskKind::ResolveThenable => 2,
        };
        self.enqueued[counter].fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MicrotaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(index: u32, kind: MicrotaskKind) -> Microtask {
        Microtask::new(GcRef::from_index(index), kind)
    }

    #[test]
    fn test_fifo_order() {
        let queue = MicrotaskQueue::new();
        for i in 0..5 {
            queue.enqueue(task(i, MicrotaskKind::FulfillReaction));
        }
        assert_eq!(queue.len(), 5);
        let order: Vec<u32> = std::iter::from_fn(|| queue.dequeue())
            .map(|task| task.cell.index())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stats_and_roots() {
        let queue = MicrotaskQueue::new();
        queue.enqueue(task(3, MicrotaskKind::FulfillReaction));
        queue.enqueue(task(4, MicrotaskKind::ResolveThenable));
        queue.enqueue(task(5, MicrotaskKind::ResolveThenable));

        let stats = queue.stats();
        assert_eq!(stats.fulfill_reactions, 1);
        assert_eq!(stats.reject_reactions, 0);
        assert_eq!(stats.resolve_thenables, 2);
        assert_eq!(stats.total(), 3);
        assert_eq!(
            queue.roots(),
            vec![
                GcRef::from_index(3),
                GcRef::from_index(4),
                GcRef::from_index(5)
            ]
        );

        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().total(), 3);
    }
}
