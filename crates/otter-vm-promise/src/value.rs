//! JavaScript values with NaN-boxing
//!
//! A `Value` is exactly one heap word, so it can be stored in any cell field
//! and traced by the marker without extra bookkeeping. See
//! [`otter_vm_gc::tagged`] for the encoding.
//!
//! Heap references carry a [`RefKind`] in the pointer hint bits. The kind is
//! how the promise layer tells a promise from a capability or a function
//! without inspecting the referenced cell.

use otter_vm_gc::GcRef;
use otter_vm_gc::tagged::{
    TAG_FALSE, TAG_NAN, TAG_NULL, TAG_TRUE, TAG_UNDEFINED, decode_int32, decode_pointer,
    encode_int32, encode_pointer, is_boxed,
};

/// Kind of a heap reference, stored in the pointer hint bits
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Ordinary object
    Object = 0,
    /// Callable function object
    Function = 1,
    /// Native promise
    Promise = 2,
    /// Promise capability record
    Capability = 3,
    /// Reaction record or job task
    Microtask = 4,
    /// Native context
    Context = 5,
    /// Internal record (e.g. the already-resolved flag)
    Record = 6,
}

impl RefKind {
    /// Decode a pointer hint
    pub fn from_hint(hint: u16) -> Option<Self> {
        Some(match hint {
            0 => RefKind::Object,
            1 => RefKind::Function,
            2 => RefKind::Promise,
            3 => RefKind::Capability,
            4 => RefKind::Microtask,
            5 => RefKind::Context,
            6 => RefKind::Record,
            _ => return None,
        })
    }
}

/// Encode a typed heap reference as a word
pub(crate) fn ref_word(target: GcRef, kind: RefKind) -> u64 {
    encode_pointer(target, kind as u16)
}

/// Decode a word as a heap reference of the given kind
pub(crate) fn ref_from_word(word: u64, kind: RefKind) -> Option<GcRef> {
    match decode_pointer(word) {
        Some((target, hint)) if RefKind::from_hint(hint) == Some(kind) => Some(target),
        _ => None,
    }
}

/// A JavaScript value using NaN-boxing for efficient storage
///
/// Equality is bitwise, which matches SameValue: `NaN` equals itself and
/// `+0` differs from `-0`. Integral numbers are normalized to int32 so that
/// `Value::number(42.0) == Value::int32(42)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value {
    bits: u64,
}

impl Value {
    /// Create undefined value
    pub const fn undefined() -> Self {
        Self {
            bits: TAG_UNDEFINED,
        }
    }

    /// Create null value
    pub const fn null() -> Self {
        Self { bits: TAG_NULL }
    }

    /// Create boolean value
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
        }
    }

    /// Create 32-bit integer value
    pub const fn int32(n: i32) -> Self {
        Self {
            bits: encode_int32(n),
        }
    }

    /// Create number value
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            return Self { bits: TAG_NAN };
        }
        let as_int = n as i32;
        if as_int as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            return Self::int32(as_int);
        }
        Self { bits: n.to_bits() }
    }

    /// Create an object reference
    pub fn object(target: GcRef) -> Self {
        Self::heap(target, RefKind::Object)
    }

    /// Create a function reference
    pub fn function(target: GcRef) -> Self {
        Self::heap(target, RefKind::Function)
    }

    /// Create a promise reference
    pub fn promise(target: GcRef) -> Self {
        Self::heap(target, RefKind::Promise)
    }

    pub(crate) fn heap(target: GcRef, kind: RefKind) -> Self {
        Self {
            bits: ref_word(target, kind),
        }
    }

    /// Reinterpret a heap word as a value
    pub const fn from_word(bits: u64) -> Self {
        Self { bits }
    }

    /// The heap word of this value
    pub const fn to_word(self) -> u64 {
        self.bits
    }

    /// Check if undefined
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// Check if null
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// Check if null or undefined
    pub fn is_nullish(&self) -> bool {
        self.is_undefined() || self.is_null()
    }

    /// Get as boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Get as int32
    pub fn as_int32(&self) -> Option<i32> {
        decode_int32(self.bits)
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        if let Some(n) = self.as_int32() {
            return Some(n as f64);
        }
        if self.bits == TAG_NAN {
            return Some(f64::NAN);
        }
        if is_boxed(self.bits) {
            return None;
        }
        Some(f64::from_bits(self.bits))
    }

    /// Check if number
    pub fn is_number(&self) -> bool {
        self.as_number().is_some()
    }

    /// Heap reference and its kind, if this is a pointer
    pub fn as_heap(&self) -> Option<(GcRef, RefKind)> {
        let (target, hint) = decode_pointer(self.bits)?;
        Some((target, RefKind::from_hint(hint)?))
    }

    /// Check if this is a JavaScript object (plain object, function or promise)
    pub fn is_object(&self) -> bool {
        matches!(
            self.as_heap(),
            Some((_, RefKind::Object | RefKind::Function | RefKind::Promise))
        )
    }

    /// Get as object reference (any JavaScript object)
    pub fn as_object(&self) -> Option<GcRef> {
        match self.as_heap() {
            Some((target, RefKind::Object | RefKind::Function | RefKind::Promise)) => {
                Some(target)
            }
            _ => None,
        }
    }

    /// Check if callable
    pub fn is_callable(&self) -> bool {
        self.as_function().is_some()
    }

    /// Get as function reference
    pub fn as_function(&self) -> Option<GcRef> {
        ref_from_word(self.bits, RefKind::Function)
    }

    /// Get as native promise reference
    pub fn as_promise(&self) -> Option<GcRef> {
        ref_from_word(self.bits, RefKind::Promise)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_undefined() {
            return write!(f, "undefined");
        }
        if self.is_null() {
            return write!(f, "null");
        }
        if let Some(b) = self.as_boolean() {
            return write!(f, "{}", b);
        }
        if let Some(n) = self.as_number() {
            return write!(f, "{}", n);
        }
        match self.as_heap() {
            Some((target, kind)) => write!(f, "{:?}({})", kind, target),
            None => write!(f, "<word {:#018x}>", self.bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined() {
        let v = Value::undefined();
        assert!(v.is_undefined());
        assert!(v.is_nullish());
        assert!(!v.is_number());
    }

    #[test]
    fn test_number_normalization() {
        assert_eq!(Value::number(42.0), Value::int32(42));
        assert_eq!(Value::number(42.0).as_int32(), Some(42));
        assert_ne!(Value::number(-0.0), Value::int32(0));
        assert_eq!(Value::number(1.5).as_number(), Some(1.5));
        assert_eq!(Value::number(f64::NAN), Value::number(f64::NAN));
        assert!(Value::number(f64::NAN).as_number().unwrap().is_nan());
    }

    #[test]
    fn test_heap_kinds() {
        let target = GcRef::from_index(3);
        let promise = Value::promise(target);
        assert!(promise.is_object());
        assert_eq!(promise.as_promise(), Some(target));
        assert_eq!(promise.as_function(), None);

        let function = Value::function(target);
        assert!(function.is_callable());
        assert_eq!(function.as_object(), Some(target));

        let capability = Value::heap(target, RefKind::Capability);
        assert!(!capability.is_object());
        assert_eq!(capability.as_heap(), Some((target, RefKind::Capability)));
    }

    #[test]
    fn test_booleans() {
        assert_eq!(Value::boolean(true).as_boolean(), Some(true));
        assert_eq!(Value::boolean(false).as_boolean(), Some(false));
        assert_eq!(Value::null().as_boolean(), None);
    }
}
