//! Tagged heap words
//!
//! Every field of every cell is one 64-bit NaN-boxed word. Pointers are
//! self-describing, so the marker can trace a cell without knowing what the
//! cell currently means.
//!
//! ```text
//! Double:     stored directly (except NaN)
//! NaN:        0x7FFA_0000_0000_0000
//! Undefined:  0x7FF8_0000_0000_0000
//! Null:       0x7FF8_0000_0000_0001
//! True:       0x7FF8_0000_0000_0002
//! False:      0x7FF8_0000_0000_0003
//! Int32:      0x7FF8_0001_XXXX_XXXX
//! Pointer:    0x7FFC_HHHH_IIII_IIII  (H = reference hint, I = cell index)
//! ```

/// Undefined
pub const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
/// Null
pub const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
/// Boolean true
pub const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
/// Boolean false
pub const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
/// Canonical NaN (distinct from undefined)
pub const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
/// 32-bit integer prefix
pub const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
/// Pointer prefix
pub const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

const INT32_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const HINT_SHIFT: u32 = 32;

/// Reference to a heap cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef(u32);

impl GcRef {
    /// Create a reference from a cell index
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Cell index
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for GcRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Encode a pointer word. The hint is opaque to the collector.
pub const fn encode_pointer(target: GcRef, hint: u16) -> u64 {
    TAG_POINTER | ((hint as u64) << HINT_SHIFT) | target.0 as u64
}

/// Check whether a word is a pointer
pub const fn is_pointer(word: u64) -> bool {
    word >> 48 == TAG_POINTER >> 48
}

/// Decode a pointer word into its target and hint
pub const fn decode_pointer(word: u64) -> Option<(GcRef, u16)> {
    if is_pointer(word) {
        Some((GcRef(word as u32), (word >> HINT_SHIFT) as u16))
    } else {
        None
    }
}

/// Encode a 32-bit integer word
pub const fn encode_int32(n: i32) -> u64 {
    TAG_INT32 | (n as u32) as u64
}

/// Decode a 32-bit integer word
pub const fn decode_int32(word: u64) -> Option<i32> {
    if word & INT32_MASK == TAG_INT32 {
        Some(word as u32 as i32)
    } else {
        None
    }
}

/// Check whether a word lies in the tagged NaN space
pub const fn is_boxed(word: u64) -> bool {
    let top = word >> 48;
    top >= 0x7FF8 && top <= 0x7FFF && word != TAG_NAN
}
