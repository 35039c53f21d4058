//! # Otter VM Promises
//!
//! Promise reactions, settlement and the microtask jobs they turn into.
//!
//! ## Design
//!
//! - **Reaction lists**: a pending promise keeps its reactions as a linked
//!   list of heap cells, newest first
//! - **In-place morphs**: settling rewrites each reaction cell into a job task
//!   of the same size and enqueues it, in registration order
//! - **Three job kinds**: fulfill reaction, reject reaction and
//!   resolve-thenable, dispatched on the cell's instance type
//! - **Concurrent marking**: the heap may be traced by another thread while
//!   reactions are morphed; every word stays self-describing throughout

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hooks;
pub mod isolate;
pub mod job;
pub mod layout;
pub mod microtask;
pub mod promise;
pub mod reaction;
pub mod settle;
pub mod thenable;
pub mod value;

pub use config::{HeapConfig, IsolateConfig};
pub use error::{PromiseError, PromiseResult};
pub use hooks::{PromiseHook, RejectionEvent, RejectionTracker};
pub use isolate::{Isolate, NativeFn};
pub use job::run_microtask;
pub use layout::{
    ContextRef, Handler, InstanceType, MicrotaskKind, PromiseCapability, PromiseOrCapability,
    PromiseReaction, PromiseReactionJobTask, PromiseResolveThenableJobTask, ReactionType,
};
pub use microtask::{JobQueue, Microtask, MicrotaskQueue, MicrotaskStats};
pub use promise::PromiseState;
pub use reaction::{ReactionIter, register, reverse_reactions};
pub use settle::{Settlement, settle};
pub use value::{RefKind, Value};

pub use otter_vm_gc::GcRef;
