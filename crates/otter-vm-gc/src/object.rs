//! GC object layout

use std::sync::atomic::{AtomicU8, Ordering};

/// GC object header
///
/// The tag doubles as the instance type of the cell. It is atomic because a
/// cell may change its instance type in place while a marker is reading it.
#[repr(C)]
pub struct GcHeader {
    /// Mark bits for tri-color marking
    mark: AtomicU8,
    /// Object type tag
    tag: AtomicU8,
    /// Reserved
    _reserved: [u8; 6],
}

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

impl GcHeader {
    /// Create new header
    pub const fn new(tag: u8) -> Self {
        Self {
            mark: AtomicU8::new(MarkColor::White as u8),
            tag: AtomicU8::new(tag),
            _reserved: [0; 6],
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// Shade a white object gray.
    ///
    /// Returns true if this call performed the transition, so exactly one
    /// caller pushes the object onto a worklist.
    pub fn shade(&self) -> bool {
        self.mark
            .compare_exchange(
                MarkColor::White as u8,
                MarkColor::Gray as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Get object tag
    pub fn tag(&self) -> u8 {
        self.tag.load(Ordering::Acquire)
    }

    /// Publish a new object tag.
    ///
    /// Must be the last store of an in-place type change: a reader that
    /// observes the new tag also observes every field written before it.
    pub fn publish_tag(&self, tag: u8) {
        self.tag.store(tag, Ordering::Release);
    }
}

/// Object type tags
///
/// Tag 0 is never allocated.
pub mod tags {
    /// Plain object
    pub const OBJECT: u8 = 1;
    /// Function object
    pub const FUNCTION: u8 = 2;
    /// Native context (execution context of a job)
    pub const NATIVE_CONTEXT: u8 = 3;
    /// Promise instance
    pub const PROMISE: u8 = 4;
    /// Promise capability record
    pub const PROMISE_CAPABILITY: u8 = 5;
    /// Shared "already resolved" flag of a resolving function pair
    pub const RESOLVING_RECORD: u8 = 6;
    /// Pending promise reaction
    pub const PROMISE_REACTION: u8 = 7;
    /// Fulfill reaction job task (morphed reaction)
    pub const PROMISE_FULFILL_REACTION_JOB_TASK: u8 = 8;
    /// Reject reaction job task (morphed reaction)
    pub const PROMISE_REJECT_REACTION_JOB_TASK: u8 = 9;
    /// Resolve-thenable job task
    pub const PROMISE_RESOLVE_THENABLE_JOB_TASK: u8 = 10;

    /// Highest tag value in use.
    pub const LAST: u8 = PROMISE_RESOLVE_THENABLE_JOB_TASK;

    /// Whether a tag names an allocatable instance type.
    pub const fn is_valid(tag: u8) -> bool {
        tag >= OBJECT && tag <= LAST
    }
}
