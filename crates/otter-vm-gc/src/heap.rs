//! GC Heap management
//!
//! Cells are fixed-size arrays of tagged words behind a shared header. The
//! cell table is guarded by a `RwLock`; field words are atomics so that a
//! marker holding a read guard can scan a cell while the mutator rewrites it
//! under another read guard. Only allocation and freeing take the write lock.

use crate::barrier::{MarkingState, deletion_barrier, insertion_barrier};
use crate::object::{GcHeader, MarkColor, tags};
use crate::tagged::{GcRef, decode_pointer};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Cell slots reserved up front (default: 1024)
    pub initial_capacity: usize,
    /// Maximum number of live cells (default: unbounded)
    pub max_cells: Option<usize>,
    /// Barrier buffer size at which pushes count as overflows in
    /// `MarkStats::barrier_overflows` (default: 1024)
    pub barrier_buffer_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            max_cells: None,
            barrier_buffer_size: 1024,
        }
    }
}

/// Heap access errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// Reference to a freed or never-allocated cell
    #[error("stale heap reference {0}")]
    StaleReference(GcRef),

    /// Field index past the end of a cell
    #[error("field {index} out of bounds for {cell} with {size} fields")]
    FieldOutOfBounds {
        /// Cell being accessed
        cell: GcRef,
        /// Requested field
        index: usize,
        /// Number of fields in the cell
        size: usize,
    },

    /// In-place type change attempted from the wrong instance type
    #[error("tag mismatch on {cell}: expected {expected}, found {found}")]
    TagMismatch {
        /// Cell being morphed
        cell: GcRef,
        /// Tag the caller expected
        expected: u8,
        /// Tag actually present
        found: u8,
    },

    /// Tag outside the known instance types
    #[error("invalid object tag {0}")]
    InvalidTag(u8),

    /// Cell limit reached
    #[error("heap exhausted: {0} live cells")]
    HeapExhausted(usize),
}

/// Result type for heap operations
pub type GcResult<T> = std::result::Result<T, GcError>;

struct HeapCell {
    header: GcHeader,
    fields: Box<[AtomicU64]>,
}

impl HeapCell {
    fn field(&self, cell: GcRef, index: usize) -> GcResult<&AtomicU64> {
        self.fields.get(index).ok_or(GcError::FieldOutOfBounds {
            cell,
            index,
            size: self.fields.len(),
        })
    }
}

struct CellTable {
    cells: Vec<Option<HeapCell>>,
    free: Vec<u32>,
    live: usize,
}

impl CellTable {
    fn get(&self, cell: GcRef) -> GcResult<&HeapCell> {
        self.cells
            .get(cell.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(GcError::StaleReference(cell))
    }

    fn write_barrier(&self, old: u64, new: u64, marking: &MarkingState) {
        let mut full = false;
        if let Some((old_ref, _)) = decode_pointer(old) {
            if let Ok(old_cell) = self.get(old_ref) {
                full |= deletion_barrier(&old_cell.header, old_ref, marking.buffer());
            }
        }
        if let Some((new_ref, _)) = decode_pointer(new) {
            if let Ok(new_cell) = self.get(new_ref) {
                full |= insertion_barrier(&new_cell.header, new_ref, marking.buffer());
            }
        }
        if full {
            marking.record_overflow();
            #[cfg(feature = "gc_logging")]
            tracing::trace!(
                target: "otter::gc",
                buffered = marking.buffer().len(),
                "write barrier buffer full"
            );
        }
    }
}

/// Main GC heap - shared between the mutator and the marker
pub struct GcHeap {
    config: GcConfig,
    table: RwLock<CellTable>,
    marking: MarkingState,
}

impl GcHeap {
    /// Create new heap with default config
    pub fn new() -> Arc<Self> {
        Self::with_config(GcConfig::default())
    }

    /// Create new heap with custom config
    pub fn with_config(config: GcConfig) -> Arc<Self> {
        Arc::new(Self {
            table: RwLock::new(CellTable {
                cells: Vec::with_capacity(config.initial_capacity),
                free: Vec::new(),
                live: 0,
            }),
            marking: MarkingState::new(config.barrier_buffer_size),
            config,
        })
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Marking state shared with the marker
    pub fn marking(&self) -> &MarkingState {
        &self.marking
    }

    /// Allocate a cell holding `words`.
    ///
    /// Cells allocated while marking is active start black; the pointers
    /// they are born with are shaded.
    pub fn allocate(&self, tag: u8, words: &[u64]) -> GcResult<GcRef> {
        if !tags::is_valid(tag) {
            return Err(GcError::InvalidTag(tag));
        }
        let mut table = self.table.write();
        if self.config.max_cells.is_some_and(|max| table.live >= max) {
            #[cfg(feature = "gc_logging")]
            tracing::warn!(target: "otter::gc", live = table.live, "heap exhausted");
            return Err(GcError::HeapExhausted(table.live));
        }

        let header = GcHeader::new(tag);
        if self.marking.is_active() {
            header.set_mark(MarkColor::Black);
            for &word in words {
                table.write_barrier(0, word, &self.marking);
            }
        }
        let cell = HeapCell {
            header,
            fields: words.iter().map(|&w| AtomicU64::new(w)).collect(),
        };

        let index = match table.free.pop() {
            Some(index) => {
                table.cells[index as usize] = Some(cell);
                index
            }
            None => {
                let index = table.cells.len() as u32;
                table.cells.push(Some(cell));
                index
            }
        };
        table.live += 1;
        Ok(GcRef::from_index(index))
    }

    /// Release a cell. Its index may be reused by a later allocation.
    pub fn free(&self, cell: GcRef) -> GcResult<()> {
        let mut table = self.table.write();
        let slot = table
            .cells
            .get_mut(cell.index() as usize)
            .ok_or(GcError::StaleReference(cell))?;
        if slot.take().is_none() {
            return Err(GcError::StaleReference(cell));
        }
        table.free.push(cell.index());
        table.live -= 1;
        Ok(())
    }

    /// Whether a reference points at a live cell
    pub fn is_live(&self, cell: GcRef) -> bool {
        self.table.read().get(cell).is_ok()
    }

    /// Number of live cells
    pub fn live_count(&self) -> usize {
        self.table.read().live
    }

    /// Instance tag of a cell
    pub fn tag(&self, cell: GcRef) -> GcResult<u8> {
        Ok(self.table.read().get(cell)?.header.tag())
    }

    /// Mark color of a cell
    pub fn mark(&self, cell: GcRef) -> GcResult<MarkColor> {
        Ok(self.table.read().get(cell)?.header.mark())
    }

    /// Number of fields in a cell
    pub fn field_count(&self, cell: GcRef) -> GcResult<usize> {
        Ok(self.table.read().get(cell)?.fields.len())
    }

    /// Storage footprint of a cell in bytes, header included
    pub fn cell_size(&self, cell: GcRef) -> GcResult<usize> {
        let fields = self.field_count(cell)?;
        Ok(std::mem::size_of::<GcHeader>() + fields * std::mem::size_of::<u64>())
    }

    /// Read one field
    pub fn load(&self, cell: GcRef, index: usize) -> GcResult<u64> {
        let table = self.table.read();
        Ok(table.get(cell)?.field(cell, index)?.load(Ordering::Acquire))
    }

    /// Read the tag and every field of a cell
    pub fn load_all(&self, cell: GcRef) -> GcResult<(u8, Vec<u64>)> {
        let table = self.table.read();
        let target = table.get(cell)?;
        let tag = target.header.tag();
        let words = target
            .fields
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect();
        Ok((tag, words))
    }

    /// Write one field
    pub fn store(&self, cell: GcRef, index: usize, word: u64) -> GcResult<()> {
        let table = self.table.read();
        let slot = table.get(cell)?.field(cell, index)?;
        let old = slot.load(Ordering::Acquire);
        if self.marking.is_active() {
            table.write_barrier(old, word, &self.marking);
        }
        slot.store(word, Ordering::Release);
        Ok(())
    }

    /// Change the instance type of a cell in place.
    ///
    /// The cell must currently carry `from_tag`. Each `(index, word)` write is
    /// applied one at a time with barriers; fields not listed are left
    /// untouched. The new tag is published after the last write. Indices are
    /// validated before any write, so a failed morph leaves the cell as it was.
    pub fn morph(
        &self,
        cell: GcRef,
        from_tag: u8,
        to_tag: u8,
        writes: &[(usize, u64)],
    ) -> GcResult<()> {
        if !tags::is_valid(to_tag) {
            return Err(GcError::InvalidTag(to_tag));
        }
        let table = self.table.read();
        let target = table.get(cell)?;
        let found = target.header.tag();
        if found != from_tag {
            return Err(GcError::TagMismatch {
                cell,
                expected: from_tag,
                found,
            });
        }
        for &(index, _) in writes {
            target.field(cell, index)?;
        }

        for &(index, word) in writes {
            let slot = &target.fields[index];
            let old = slot.load(Ordering::Acquire);
            if old == word {
                continue;
            }
            if self.marking.is_active() {
                table.write_barrier(old, word, &self.marking);
            }
            slot.store(word, Ordering::Release);
        }
        target.header.publish_tag(to_tag);
        Ok(())
    }

    /// Shade a cell gray. Returns true if it was white.
    pub(crate) fn shade(&self, cell: GcRef) -> bool {
        match self.table.read().get(cell) {
            Ok(target) => target.header.shade(),
            Err(_) => false,
        }
    }

    /// Set a cell's mark color, ignoring freed cells
    pub(crate) fn set_mark(&self, cell: GcRef, color: MarkColor) {
        if let Ok(target) = self.table.read().get(cell) {
            target.header.set_mark(color);
        }
    }

    /// Reset every live cell to white
    pub(crate) fn reset_marks(&self) {
        let table = self.table.read();
        for cell in table.cells.iter().flatten() {
            cell.header.set_mark(MarkColor::White);
        }
    }
}
