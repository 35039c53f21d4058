//! Isolate configuration.

use crate::error::PromiseResult;
use otter_vm_gc::GcConfig;
use serde::Deserialize;

/// Configuration for an [`Isolate`](crate::Isolate).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolateConfig {
    /// Emit promise hook events even when no hook is installed.
    /// Disables the `await` fast path that skips the throwaway promise.
    #[serde(default)]
    pub promise_hooks: bool,

    /// Maximum jobs run by one `run_microtasks` call (default: drain fully)
    #[serde(default)]
    pub drain_budget: Option<usize>,

    /// Heap settings
    #[serde(default)]
    pub heap: HeapConfig,
}

/// Heap section of the isolate configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeapConfig {
    /// Cell slots reserved up front
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Maximum number of live cells
    #[serde(default)]
    pub max_cells: Option<usize>,

    /// Write barrier buffer size
    #[serde(default = "default_barrier_buffer_size")]
    pub barrier_buffer_size: usize,
}

fn default_initial_capacity() -> usize {
    GcConfig::default().initial_capacity
}

fn default_barrier_buffer_size() -> usize {
    GcConfig::default().barrier_buffer_size
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            max_cells: None,
            barrier_buffer_size: default_barrier_buffer_size(),
        }
    }
}

impl IsolateConfig {
    /// Parse a JSON configuration document
    pub fn from_json(source: &str) -> PromiseResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Heap configuration for the GC crate
    pub fn gc_config(&self) -> GcConfig {
        GcConfig {
            initial_capacity: self.heap.initial_capacity,
            max_cells: self.heap.max_cells,
            barrier_buffer_size: self.heap.barrier_buffer_size,
        }
    }
}
