//! # Otter VM Garbage Collector
//!
//! Tagged cell heap used by the promise job machinery.
//!
//! ## Design
//!
//! - **Tagged words**: every field is a NaN-boxed 64-bit word, so pointers are
//!   found without knowing a cell's layout
//! - **In-place morphs**: a cell can change instance type without reallocating;
//!   the new tag is published after the reinterpreted fields
//! - **Incremental marking**: a marker may scan cells between mutator steps,
//!   kept sound by insertion and deletion barriers

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod barrier;
pub mod heap;
pub mod marker;
pub mod object;
pub mod tagged;

pub use barrier::{MarkingState, WriteBarrierBuffer};
pub use heap::{GcConfig, GcError, GcHeap, GcResult};
pub use marker::{MarkStats, Marker};
pub use object::{GcHeader, MarkColor, tags};
pub use tagged::GcRef;
