//! Promise lifecycle hooks and rejection tracking

use crate::layout::PromiseOrCapability;
use otter_vm_gc::GcRef;

/// Observer of promise lifecycle events, for async stack tooling.
///
/// Installing a hook turns off the `await` optimization that skips
/// allocating a throwaway promise, so `before`/`after` always have a target.
pub trait PromiseHook: Send {
    /// A promise was created; `parent` is the promise it was derived from
    fn init(&mut self, _promise: GcRef, _parent: Option<GcRef>) {}

    /// A promise settled
    fn resolve(&mut self, _promise: GcRef) {}

    /// A reaction job is about to run
    fn before(&mut self, _target: PromiseOrCapability) {}

    /// A reaction job finished running
    fn after(&mut self, _target: PromiseOrCapability) {}
}

/// Event delivered to the host rejection tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionEvent {
    /// A promise was rejected while nothing was listening
    RejectWithNoHandler,
    /// A handler was attached to an already rejected, unhandled promise
    HandlerAddedAfterReject,
}

/// Host callback for unhandled rejection tracking
pub type RejectionTracker = Box<dyn FnMut(GcRef, RejectionEvent) + Send>;
