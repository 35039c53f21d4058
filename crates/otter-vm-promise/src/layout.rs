//! Object layouts of the promise job machinery
//!
//! Every record is a heap cell of tagged words; the header tag is the
//! instance type. A pending [`PromiseReaction`] and both reaction job task
//! forms have the same word count, so settling a promise can reinterpret a
//! reaction as a job in place instead of allocating.
//!
//! ```text
//! word   PromiseReaction         PromiseReactionJobTask   PromiseResolveThenableJobTask
//!  0     next                    argument                 context
//!  1     reject_handler          context                  promise_to_resolve
//!  2     fulfill_handler         handler                  then
//!  3     promise_or_capability   promise_or_capability    thenable
//! ```

use crate::error::{PromiseError, PromiseResult};
use crate::value::{RefKind, Value, ref_from_word, ref_word};
use otter_vm_gc::tagged::{TAG_UNDEFINED, decode_int32, encode_int32};
use otter_vm_gc::{GcRef, tags};

/// Instance type stored in a cell header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceType {
    /// Ordinary object
    JsObject = tags::OBJECT,
    /// Function object
    JsFunction = tags::FUNCTION,
    /// Execution context
    NativeContext = tags::NATIVE_CONTEXT,
    /// Native promise
    JsPromise = tags::PROMISE,
    /// Promise capability record
    PromiseCapability = tags::PROMISE_CAPABILITY,
    /// Already-resolved flag shared by a resolving function pair
    ResolvingRecord = tags::RESOLVING_RECORD,
    /// Pending reaction
    PromiseReaction = tags::PROMISE_REACTION,
    /// Fulfill reaction job
    PromiseFulfillReactionJobTask = tags::PROMISE_FULFILL_REACTION_JOB_TASK,
    /// Reject reaction job
    PromiseRejectReactionJobTask = tags::PROMISE_REJECT_REACTION_JOB_TASK,
    /// Resolve-thenable job
    PromiseResolveThenableJobTask = tags::PROMISE_RESOLVE_THENABLE_JOB_TASK,
}

impl InstanceType {
    /// Decode a header tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            tags::OBJECT => Self::JsObject,
            tags::FUNCTION => Self::JsFunction,
            tags::NATIVE_CONTEXT => Self::NativeContext,
            tags::PROMISE => Self::JsPromise,
            tags::PROMISE_CAPABILITY => Self::PromiseCapability,
            tags::RESOLVING_RECORD => Self::ResolvingRecord,
            tags::PROMISE_REACTION => Self::PromiseReaction,
            tags::PROMISE_FULFILL_REACTION_JOB_TASK => Self::PromiseFulfillReactionJobTask,
            tags::PROMISE_REJECT_REACTION_JOB_TASK => Self::PromiseRejectReactionJobTask,
            tags::PROMISE_RESOLVE_THENABLE_JOB_TASK => Self::PromiseResolveThenableJobTask,
            _ => return None,
        })
    }

    /// Header tag of this instance type
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::JsObject => "JSObject",
            Self::JsFunction => "JSFunction",
            Self::NativeContext => "NativeContext",
            Self::JsPromise => "JSPromise",
            Self::PromiseCapability => "PromiseCapability",
            Self::ResolvingRecord => "ResolvingRecord",
            Self::PromiseReaction => "PromiseReaction",
            Self::PromiseFulfillReactionJobTask => "PromiseFulfillReactionJobTask",
            Self::PromiseRejectReactionJobTask => "PromiseRejectReactionJobTask",
            Self::PromiseResolveThenableJobTask => "PromiseResolveThenableJobTask",
        }
    }
}

/// Fail unless `tag` is the expected instance type
pub(crate) fn expect_instance(cell: GcRef, tag: u8, expected: InstanceType) -> PromiseResult<()> {
    if tag == expected.tag() {
        Ok(())
    } else {
        Err(PromiseError::UnexpectedInstanceType {
            cell,
            expected: expected.name(),
            found: tag,
        })
    }
}

/// The three kinds of schedulable job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicrotaskKind {
    /// Run a fulfill handler
    FulfillReaction,
    /// Run a reject handler
    RejectReaction,
    /// Adopt the state of a thenable
    ResolveThenable,
}

impl MicrotaskKind {
    /// Header instance type of jobs of this kind
    pub const fn instance_type(self) -> InstanceType {
        match self {
            Self::FulfillReaction => InstanceType::PromiseFulfillReactionJobTask,
            Self::RejectReaction => InstanceType::PromiseRejectReactionJobTask,
            Self::ResolveThenable => InstanceType::PromiseResolveThenableJobTask,
        }
    }

    /// Job kind of a header tag, if it is a job
    pub fn from_tag(tag: u8) -> Option<Self> {
        match InstanceType::from_tag(tag)? {
            InstanceType::PromiseFulfillReactionJobTask => Some(Self::FulfillReaction),
            InstanceType::PromiseRejectReactionJobTask => Some(Self::RejectReaction),
            InstanceType::PromiseResolveThenableJobTask => Some(Self::ResolveThenable),
            _ => None,
        }
    }
}

/// Which outcome a promise settled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionType {
    /// Settled by fulfillment
    Fulfill,
    /// Settled by rejection
    Reject,
}

impl ReactionType {
    /// Job kind a reaction becomes for this outcome
    pub const fn job_kind(self) -> MicrotaskKind {
        match self {
            Self::Fulfill => MicrotaskKind::FulfillReaction,
            Self::Reject => MicrotaskKind::RejectReaction,
        }
    }
}

/// A reaction handler slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    /// No handler was supplied: pass the value through (fulfill) or rethrow
    /// the reason (reject)
    Default,
    /// Function to call with the settlement value
    Callable(GcRef),
}

impl Handler {
    /// Handler for a `then` argument; non-callables mean "unspecified"
    pub fn from_value(value: Value) -> Self {
        match value.as_function() {
            Some(function) => Self::Callable(function),
            None => Self::Default,
        }
    }
}

/// Where the outcome of a reaction job goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseOrCapability {
    /// A native derived promise
    Promise(GcRef),
    /// A capability for a non-native promise
    Capability(GcRef),
    /// Nothing depends on the outcome (`await` without promise hooks)
    Undefined,
}

/// Execution context a job runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRef(pub GcRef);

/// Conversion between a field type and its heap word
pub(crate) trait FieldWord: Sized {
    fn to_word(self) -> u64;
    fn from_word(word: u64) -> Option<Self>;
}

impl FieldWord for Value {
    fn to_word(self) -> u64 {
        Value::to_word(self)
    }

    fn from_word(word: u64) -> Option<Self> {
        Some(Value::from_word(word))
    }
}

/// Reaction list link; the int32 zero word terminates the list
impl FieldWord for Option<GcRef> {
    fn to_word(self) -> u64 {
        match self {
            Some(cell) => ref_word(cell, RefKind::Microtask),
            None => encode_int32(0),
        }
    }

    fn from_word(word: u64) -> Option<Self> {
        if decode_int32(word) == Some(0) {
            return Some(None);
        }
        ref_from_word(word, RefKind::Microtask).map(Some)
    }
}

impl FieldWord for Handler {
    fn to_word(self) -> u64 {
        match self {
            Self::Default => TAG_UNDEFINED,
            Self::Callable(function) => ref_word(function, RefKind::Function),
        }
    }

    fn from_word(word: u64) -> Option<Self> {
        if word == TAG_UNDEFINED {
            return Some(Self::Default);
        }
        ref_from_word(word, RefKind::Function).map(Self::Callable)
    }
}

impl FieldWord for PromiseOrCapability {
    fn to_word(self) -> u64 {
        match self {
            Self::Promise(promise) => ref_word(promise, RefKind::Promise),
            Self::Capability(capability) => ref_word(capability, RefKind::Capability),
            Self::Undefined => TAG_UNDEFINED,
        }
    }

    fn from_word(word: u64) -> Option<Self> {
        if word == TAG_UNDEFINED {
            return Some(Self::Undefined);
        }
        if let Some(promise) = ref_from_word(word, RefKind::Promise) {
            return Some(Self::Promise(promise));
        }
        ref_from_word(word, RefKind::Capability).map(Self::Capability)
    }
}

impl FieldWord for ContextRef {
    fn to_word(self) -> u64 {
        ref_word(self.0, RefKind::Context)
    }

    fn from_word(word: u64) -> Option<Self> {
        ref_from_word(word, RefKind::Context).map(ContextRef)
    }
}

/// Decode field `index` of a cell's words
pub(crate) fn decode_field<T: FieldWord>(
    cell: GcRef,
    words: &[u64],
    index: usize,
    field: &'static str,
) -> PromiseResult<T> {
    words
        .get(index)
        .copied()
        .and_then(T::from_word)
        .ok_or(PromiseError::MalformedField { cell, field })
}

/// Decode a typed reference field
pub(crate) fn decode_ref(
    cell: GcRef,
    words: &[u64],
    index: usize,
    kind: RefKind,
    field: &'static str,
) -> PromiseResult<GcRef> {
    words
        .get(index)
        .and_then(|&word| ref_from_word(word, kind))
        .ok_or(PromiseError::MalformedField { cell, field })
}

/// A continuation registered on a pending promise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseReaction {
    /// Previously registered reaction (the list is newest first)
    pub next: Option<GcRef>,
    /// Handler run on rejection
    pub reject_handler: Handler,
    /// Handler run on fulfillment
    pub fulfill_handler: Handler,
    /// Dependent promise or capability
    pub promise_or_capability: PromiseOrCapability,
}

impl PromiseReaction {
    pub const NEXT_OFFSET: usize = 0;
    pub const REJECT_HANDLER_OFFSET: usize = 1;
    pub const FULFILL_HANDLER_OFFSET: usize = 2;
    pub const PROMISE_OR_CAPABILITY_OFFSET: usize = 3;
    /// Size in words
    pub const SIZE: usize = 4;

    /// Encode as cell words
    pub fn to_words(&self) -> [u64; Self::SIZE] {
        [
            self.next.to_word(),
            self.reject_handler.to_word(),
            self.fulfill_handler.to_word(),
            self.promise_or_capability.to_word(),
        ]
    }

    /// Decode from cell words
    pub fn from_words(cell: GcRef, words: &[u64]) -> PromiseResult<Self> {
        Ok(Self {
            next: decode_field(cell, words, Self::NEXT_OFFSET, "next")?,
            reject_handler: decode_field(cell, words, Self::REJECT_HANDLER_OFFSET, "reject_handler")?,
            fulfill_handler: decode_field(
                cell,
                words,
                Self::FULFILL_HANDLER_OFFSET,
                "fulfill_handler",
            )?,
            promise_or_capability: decode_field(
                cell,
                words,
                Self::PROMISE_OR_CAPABILITY_OFFSET,
                "promise_or_capability",
            )?,
        })
    }

    /// The handler selected by a settlement outcome
    pub fn handler(&self, reaction_type: ReactionType) -> Handler {
        match reaction_type {
            ReactionType::Fulfill => self.fulfill_handler,
            ReactionType::Reject => self.reject_handler,
        }
    }

    /// Convert into the job form for a settlement. The reaction is consumed;
    /// the dependent promise or capability carries over unchanged.
    pub fn into_job_task(
        self,
        reaction_type: ReactionType,
        argument: Value,
        context: ContextRef,
    ) -> PromiseReactionJobTask {
        PromiseReactionJobTask {
            argument,
            context,
            handler: self.handler(reaction_type),
            promise_or_capability: self.promise_or_capability,
        }
    }
}

/// A fulfill or reject reaction job, ready to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseReactionJobTask {
    /// Settlement value or reason
    pub argument: Value,
    /// Context the handler runs in
    pub context: ContextRef,
    /// Handler for this outcome
    pub handler: Handler,
    /// Dependent promise or capability
    pub promise_or_capability: PromiseOrCapability,
}

impl PromiseReactionJobTask {
    pub const ARGUMENT_OFFSET: usize = 0;
    pub const CONTEXT_OFFSET: usize = 1;
    pub const HANDLER_OFFSET: usize = 2;
    pub const PROMISE_OR_CAPABILITY_OFFSET: usize = 3;
    /// Size in words
    pub const SIZE: usize = 4;

    /// Encode as cell words
    pub fn to_words(&self) -> [u64; Self::SIZE] {
        [
            self.argument.to_word(),
            self.context.to_word(),
            self.handler.to_word(),
            self.promise_or_capability.to_word(),
        ]
    }

    /// Words a reaction cell must receive to become this job. The dependent
    /// promise or capability shares its slot with the reaction and is absent.
    pub fn morph_writes(&self) -> [(usize, u64); 3] {
        [
            (Self::ARGUMENT_OFFSET, self.argument.to_word()),
            (Self::CONTEXT_OFFSET, self.context.to_word()),
            (Self::HANDLER_OFFSET, self.handler.to_word()),
        ]
    }

    /// Decode from cell words
    pub fn from_words(cell: GcRef, words: &[u64]) -> PromiseResult<Self> {
        Ok(Self {
            argument: decode_field(cell, words, Self::ARGUMENT_OFFSET, "argument")?,
            context: decode_field(cell, words, Self::CONTEXT_OFFSET, "context")?,
            handler: decode_field(cell, words, Self::HANDLER_OFFSET, "handler")?,
            promise_or_capability: decode_field(
                cell,
                words,
                Self::PROMISE_OR_CAPABILITY_OFFSET,
                "promise_or_capability",
            )?,
        })
    }
}

/// A job that resolves a promise with a thenable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseResolveThenableJobTask {
    /// Context of the `then` function
    pub context: ContextRef,
    /// Promise adopting the thenable's state
    pub promise_to_resolve: GcRef,
    /// The thenable's `then` function
    pub then: GcRef,
    /// The thenable object
    pub thenable: Value,
}

impl PromiseResolveThenableJobTask {
    pub const CONTEXT_OFFSET: usize = 0;
    pub const PROMISE_TO_RESOLVE_OFFSET: usize = 1;
    pub const THEN_OFFSET: usize = 2;
    pub const THENABLE_OFFSET: usize = 3;
    /// Size in words
    pub const SIZE: usize = 4;

    /// Encode as cell words
    pub fn to_words(&self) -> [u64; Self::SIZE] {
        [
            self.context.to_word(),
            ref_word(self.promise_to_resolve, RefKind::Promise),
            ref_word(self.then, RefKind::Function),
            self.thenable.to_word(),
        ]
    }

    /// Decode from cell words
    pub fn from_words(cell: GcRef, words: &[u64]) -> PromiseResult<Self> {
        let thenable: Value = decode_field(cell, words, Self::THENABLE_OFFSET, "thenable")?;
        if !thenable.is_object() {
            return Err(PromiseError::MalformedField {
                cell,
                field: "thenable",
            });
        }
        Ok(Self {
            context: decode_field(cell, words, Self::CONTEXT_OFFSET, "context")?,
            promise_to_resolve: decode_ref(
                cell,
                words,
                Self::PROMISE_TO_RESOLVE_OFFSET,
                RefKind::Promise,
                "promise_to_resolve",
            )?,
            then: decode_ref(cell, words, Self::THEN_OFFSET, RefKind::Function, "then")?,
            thenable,
        })
    }
}

/// Promise plus its resolve and reject functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseCapability {
    /// The promise
    pub promise: Value,
    /// Function that resolves it
    pub resolve: Value,
    /// Function that rejects it
    pub reject: Value,
}

impl PromiseCapability {
    pub const PROMISE_OFFSET: usize = 0;
    pub const RESOLVE_OFFSET: usize = 1;
    pub const REJECT_OFFSET: usize = 2;
    /// Size in words
    pub const SIZE: usize = 3;

    /// Encode as cell words
    pub fn to_words(&self) -> [u64; Self::SIZE] {
        [
            self.promise.to_word(),
            self.resolve.to_word(),
            self.reject.to_word(),
        ]
    }

    /// Decode from cell words
    pub fn from_words(cell: GcRef, words: &[u64]) -> PromiseResult<Self> {
        Ok(Self {
            promise: decode_field(cell, words, Self::PROMISE_OFFSET, "promise")?,
            resolve: decode_field(cell, words, Self::RESOLVE_OFFSET, "resolve")?,
            reject: decode_field(cell, words, Self::REJECT_OFFSET, "reject")?,
        })
    }
}

const _: () = assert!(PromiseReaction::SIZE == PromiseReactionJobTask::SIZE);
const _: () = assert!(PromiseReaction::SIZE == PromiseResolveThenableJobTask::SIZE);
const _: () = assert!(
    PromiseReaction::PROMISE_OR_CAPABILITY_OFFSET
        == PromiseReactionJobTask::PROMISE_OR_CAPABILITY_OFFSET
);
