//! Promise machinery error types

use crate::value::Value;
use otter_vm_gc::{GcError, GcRef};
use thiserror::Error;

/// Errors raised while registering, settling or running promise jobs
#[derive(Debug, Error)]
pub enum PromiseError {
    /// Thrown JS exception
    #[error("Uncaught exception: {0:?}")]
    Exception(Value),

    /// Heap access failed
    #[error("Heap error: {0}")]
    Gc(#[from] GcError),

    /// The reaction list of a promise is not a well-formed chain
    #[error("Corrupt reaction list at {head}: {reason}")]
    CorruptReactionList {
        /// Head of the list being walked
        head: GcRef,
        /// What went wrong
        reason: &'static str,
    },

    /// A cell carries a different instance type than the caller requires
    #[error("Unexpected instance type on {cell}: expected {expected}, found tag {found}")]
    UnexpectedInstanceType {
        /// Offending cell
        cell: GcRef,
        /// Instance type the caller required
        expected: &'static str,
        /// Tag actually present
        found: u8,
    },

    /// A field word does not decode to the type its slot requires
    #[error("Malformed {field} field on {cell}")]
    MalformedField {
        /// Offending cell
        cell: GcRef,
        /// Field name
        field: &'static str,
    },

    /// Reaction registered on a settled promise
    #[error("Promise {0} is not pending")]
    NotPending(GcRef),

    /// Invalid isolate configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PromiseError {
    /// Wrap a thrown JS value
    pub fn exception(value: Value) -> Self {
        Self::Exception(value)
    }

    /// The thrown value, if this is a JS exception
    pub fn thrown_value(&self) -> Option<Value> {
        match self {
            Self::Exception(value) => Some(*value),
            _ => None,
        }
    }
}

/// Result type for promise operations
pub type PromiseResult<T> = std::result::Result<T, PromiseError>;
