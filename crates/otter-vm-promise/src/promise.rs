//! Native promise objects
//!
//! A promise cell has three words: status, reactions-or-result and flags.
//! While pending, the middle word links the reaction list; once settled it
//! holds the result. Settlement is terminal.

use crate::error::{PromiseError, PromiseResult};
use crate::hooks::RejectionEvent;
use crate::isolate::{Builtin, FunctionLayout, Isolate};
use crate::layout::{
    FieldWord, Handler, InstanceType, PromiseCapability, PromiseOrCapability,
    PromiseReactionJobTask, ReactionType, decode_ref, expect_instance,
};
use crate::microtask::{JobQueue, Microtask};
use crate::reaction;
use crate::settle::{Settlement, settle};
use crate::value::{RefKind, Value, ref_word};
use otter_vm_gc::tagged::{TAG_FALSE, TAG_TRUE, decode_int32, encode_int32};
use otter_vm_gc::{GcRef, tags};

pub(crate) const STATUS_OFFSET: usize = 0;
pub(crate) const REACTIONS_OR_RESULT_OFFSET: usize = 1;
pub(crate) const FLAGS_OFFSET: usize = 2;
const PROMISE_SIZE: usize = 3;

/// A handler has been attached at some point
const HAS_HANDLER: i32 = 1 << 0;

/// Status word of a promise cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromiseStatus {
    Pending = 0,
    Fulfilled = 1,
    Rejected = 2,
}

impl PromiseStatus {
    fn from_i32(status: i32) -> Option<Self> {
        match status {
            0 => Some(Self::Pending),
            1 => Some(Self::Fulfilled),
            2 => Some(Self::Rejected),
            _ => None,
        }
    }

    pub(crate) fn to_word(self) -> u64 {
        encode_int32(self as i32)
    }
}

/// Observable state of a promise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    /// Not settled yet
    Pending,
    /// Fulfilled with a value
    Fulfilled(Value),
    /// Rejected with a reason
    Rejected(Value),
}

/// Decoded words of a promise cell
#[derive(Debug, Clone, Copy)]
pub(crate) struct PromiseFields {
    pub status: PromiseStatus,
    pub reactions_or_result: u64,
    pub flags: i32,
}

impl PromiseFields {
    /// Head of the reaction list; only meaningful while pending
    pub fn reaction_head(&self, promise: GcRef) -> PromiseResult<Option<GcRef>> {
        <Option<GcRef>>::from_word(self.reactions_or_result).ok_or(PromiseError::MalformedField {
            cell: promise,
            field: "reactions",
        })
    }

    pub fn has_handler(&self) -> bool {
        self.flags & HAS_HANDLER != 0
    }
}

/// Which half of a resolving function pair is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Resolve,
    Reject,
}

impl Isolate {
    pub(crate) fn promise_fields(&self, promise: GcRef) -> PromiseResult<PromiseFields> {
        let (tag, words) = self.heap().load_all(promise)?;
        expect_instance(promise, tag, InstanceType::JsPromise)?;
        let malformed = |field| PromiseError::MalformedField {
            cell: promise,
            field,
        };
        let status = words
            .get(STATUS_OFFSET)
            .and_then(|&word| decode_int32(word))
            .and_then(PromiseStatus::from_i32)
            .ok_or_else(|| malformed("status"))?;
        let reactions_or_result = words
            .get(REACTIONS_OR_RESULT_OFFSET)
            .copied()
            .ok_or_else(|| malformed("reactions_or_result"))?;
        let flags = words
            .get(FLAGS_OFFSET)
            .and_then(|&word| decode_int32(word))
            .ok_or_else(|| malformed("flags"))?;
        Ok(PromiseFields {
            status,
            reactions_or_result,
            flags,
        })
    }

    /// Create a pending promise
    pub fn new_promise(&mut self) -> PromiseResult<GcRef> {
        self.new_derived_promise(None)
    }

    fn new_derived_promise(&mut self, parent: Option<GcRef>) -> PromiseResult<GcRef> {
        let mut words = [0u64; PROMISE_SIZE];
        words[STATUS_OFFSET] = PromiseStatus::Pending.to_word();
        words[REACTIONS_OR_RESULT_OFFSET] = None::<GcRef>.to_word();
        words[FLAGS_OFFSET] = encode_int32(0);
        let promise = self.heap().allocate(tags::PROMISE, &words)?;
        self.with_hook(|hook| hook.init(promise, parent));
        Ok(promise)
    }

    /// Current state of a promise
    pub fn promise_state(&self, promise: GcRef) -> PromiseResult<PromiseState> {
        let fields = self.promise_fields(promise)?;
        let result = Value::from_word(fields.reactions_or_result);
        Ok(match fields.status {
            PromiseStatus::Pending => PromiseState::Pending,
            PromiseStatus::Fulfilled => PromiseState::Fulfilled(result),
            PromiseStatus::Rejected => PromiseState::Rejected(result),
        })
    }

    /// Whether a promise has not settled yet
    pub fn is_pending(&self, promise: GcRef) -> PromiseResult<bool> {
        Ok(self.promise_fields(promise)?.status == PromiseStatus::Pending)
    }

    /// Whether a handler was ever attached
    pub fn promise_has_handler(&self, promise: GcRef) -> PromiseResult<bool> {
        Ok(self.promise_fields(promise)?.has_handler())
    }

    /// Attach handlers to a promise.
    ///
    /// On a pending promise this registers a reaction. On a settled promise
    /// the job is built directly and enqueued.
    pub fn perform_then(
        &mut self,
        promise: GcRef,
        on_fulfilled: Handler,
        on_rejected: Handler,
        result: PromiseOrCapability,
    ) -> PromiseResult<()> {
        let fields = self.promise_fields(promise)?;
        match fields.status {
            PromiseStatus::Pending => {
                reaction::register(self, promise, on_fulfilled, on_rejected, result)?;
            }
            PromiseStatus::Fulfilled => {
                let value = Value::from_word(fields.reactions_or_result);
                self.enqueue_reaction_job(ReactionType::Fulfill, value, on_fulfilled, result)?;
            }
            PromiseStatus::Rejected => {
                if !fields.has_handler() {
                    self.report_rejection(promise, RejectionEvent::HandlerAddedAfterReject);
                }
                let reason = Value::from_word(fields.reactions_or_result);
                self.enqueue_reaction_job(ReactionType::Reject, reason, on_rejected, result)?;
            }
        }
        if !fields.has_handler() {
            self.heap()
                .store(promise, FLAGS_OFFSET, encode_int32(fields.flags | HAS_HANDLER))?;
        }
        Ok(())
    }

    /// Build a reaction job for an already settled promise and enqueue it
    pub(crate) fn enqueue_reaction_job(
        &mut self,
        reaction_type: ReactionType,
        argument: Value,
        handler: Handler,
        promise_or_capability: PromiseOrCapability,
    ) -> PromiseResult<GcRef> {
        let task = PromiseReactionJobTask {
            argument,
            context: self.handler_context(handler)?,
            handler,
            promise_or_capability,
        };
        let kind = reaction_type.job_kind();
        let cell = self
            .heap()
            .allocate(kind.instance_type().tag(), &task.to_words())?;
        self.queue().enqueue(Microtask::new(cell, kind));
        Ok(cell)
    }

    /// `promise.then(on_fulfilled, on_rejected)`, returning the derived promise
    pub fn then(
        &mut self,
        promise: GcRef,
        on_fulfilled: Value,
        on_rejected: Value,
    ) -> PromiseResult<GcRef> {
        let derived = self.new_derived_promise(Some(promise))?;
        self.perform_then(
            promise,
            Handler::from_value(on_fulfilled),
            Handler::from_value(on_rejected),
            PromiseOrCapability::Promise(derived),
        )?;
        Ok(derived)
    }

    /// `then` whose outcome goes to a capability instead of a derived promise
    pub fn then_with_capability(
        &mut self,
        promise: GcRef,
        on_fulfilled: Value,
        on_rejected: Value,
        capability: GcRef,
    ) -> PromiseResult<()> {
        self.capability(capability)?;
        self.perform_then(
            promise,
            Handler::from_value(on_fulfilled),
            Handler::from_value(on_rejected),
            PromiseOrCapability::Capability(capability),
        )
    }

    pub(crate) fn promise_then_builtin(&mut self, this: Value, args: &[Value]) -> PromiseResult<Value> {
        let Some(promise) = this.as_promise() else {
            return Err(self.type_error("Promise.prototype.then called on incompatible receiver"));
        };
        let on_fulfilled = args.first().copied().unwrap_or_default();
        let on_rejected = args.get(1).copied().unwrap_or_default();
        let derived = self.then(promise, on_fulfilled, on_rejected)?;
        Ok(Value::promise(derived))
    }

    /// Fulfill a promise, returning the number of jobs scheduled
    pub fn fulfill_promise(&mut self, promise: GcRef, value: Value) -> PromiseResult<usize> {
        settle(self, promise, Settlement::Fulfilled(value))
    }

    /// Reject a promise, returning the number of jobs scheduled
    pub fn reject_promise(&mut self, promise: GcRef, reason: Value) -> PromiseResult<usize> {
        settle(self, promise, Settlement::Rejected(reason))
    }

    /// Resolve a promise with a value that may be a thenable.
    ///
    /// Does nothing if the promise already settled.
    pub fn resolve_promise(&mut self, promise: GcRef, resolution: Value) -> PromiseResult<()> {
        if !self.is_pending(promise)? {
            return Ok(());
        }
        if resolution.as_promise() == Some(promise) {
            let error = self.new_type_error("Chaining cycle detected for promise")?;
            self.reject_promise(promise, error)?;
            return Ok(());
        }
        if !resolution.is_object() {
            self.fulfill_promise(promise, resolution)?;
            return Ok(());
        }
        match self.get_property(resolution, "then").as_function() {
            Some(then) => {
                self.enqueue_resolve_thenable_job(promise, resolution, then)?;
            }
            None => {
                self.fulfill_promise(promise, resolution)?;
            }
        }
        Ok(())
    }

    /// Create the resolve/reject pair for a promise. The pair shares one
    /// already-resolved flag, so only the first call of either has an effect.
    pub fn create_resolving_functions(&mut self, promise: GcRef) -> PromiseResult<(Value, Value)> {
        let record = self
            .heap()
            .allocate(tags::RESOLVING_RECORD, &[TAG_FALSE])?;
        let target = ref_word(promise, RefKind::Promise);
        let record = ref_word(record, RefKind::Record);
        let resolve = self.new_builtin_function(Builtin::Resolve, target, record)?;
        let reject = self.new_builtin_function(Builtin::Reject, target, record)?;
        Ok((Value::function(resolve), Value::function(reject)))
    }

    pub(crate) fn run_resolve_function(
        &mut self,
        function: GcRef,
        resolution: Value,
    ) -> PromiseResult<Value> {
        self.run_resolving_function(function, Resolution::Resolve, resolution)
    }

    pub(crate) fn run_reject_function(
        &mut self,
        function: GcRef,
        reason: Value,
    ) -> PromiseResult<Value> {
        self.run_resolving_function(function, Resolution::Reject, reason)
    }

    fn run_resolving_function(
        &mut self,
        function: GcRef,
        resolution: Resolution,
        value: Value,
    ) -> PromiseResult<Value> {
        let words = self.function_words(function)?;
        let promise = decode_ref(
            function,
            &words,
            FunctionLayout::TARGET_OFFSET,
            RefKind::Promise,
            "promise",
        )?;
        let record = decode_ref(
            function,
            &words,
            FunctionLayout::RECORD_OFFSET,
            RefKind::Record,
            "already_resolved",
        )?;

        let (tag, flag) = self.heap().load_all(record)?;
        expect_instance(record, tag, InstanceType::ResolvingRecord)?;
        if flag.first() == Some(&TAG_TRUE) {
            return Ok(Value::undefined());
        }
        self.heap().store(record, 0, TAG_TRUE)?;

        match resolution {
            Resolution::Resolve => self.resolve_promise(promise, value)?,
            Resolution::Reject => {
                self.reject_promise(promise, value)?;
            }
        }
        Ok(Value::undefined())
    }

    /// Package a promise and its resolving functions as a capability
    pub fn new_capability(
        &mut self,
        promise: Value,
        resolve: Value,
        reject: Value,
    ) -> PromiseResult<GcRef> {
        if !resolve.is_callable() || !reject.is_callable() {
            return Err(self.type_error("Promise resolve or reject function is not callable"));
        }
        let capability = PromiseCapability {
            promise,
            resolve,
            reject,
        };
        Ok(self
            .heap()
            .allocate(tags::PROMISE_CAPABILITY, &capability.to_words())?)
    }

    /// A capability backed by a fresh native promise
    pub fn new_promise_capability(&mut self) -> PromiseResult<GcRef> {
        let promise = self.new_promise()?;
        let (resolve, reject) = self.create_resolving_functions(promise)?;
        self.new_capability(Value::promise(promise), resolve, reject)
    }

    /// Read a capability record
    pub fn capability(&self, capability: GcRef) -> PromiseResult<PromiseCapability> {
        let (tag, words) = self.heap().load_all(capability)?;
        expect_instance(capability, tag, InstanceType::PromiseCapability)?;
        PromiseCapability::from_words(capability, &words)
    }

    /// Attach the continuations of an `await`.
    ///
    /// Without promise hooks nothing observes the outcome of the reaction,
    /// so no throwaway promise is allocated.
    pub fn await_value(
        &mut self,
        value: Value,
        on_fulfilled: Value,
        on_rejected: Value,
    ) -> PromiseResult<PromiseOrCapability> {
        let promise = match value.as_promise() {
            Some(promise) => promise,
            None => {
                let promise = self.new_promise()?;
                self.resolve_promise(promise, value)?;
                promise
            }
        };
        let target = if self.promise_hooks_enabled() {
            PromiseOrCapability::Promise(self.new_derived_promise(Some(promise))?)
        } else {
            PromiseOrCapability::Undefined
        };
        self.perform_then(
            promise,
            Handler::from_value(on_fulfilled),
            Handler::from_value(on_rejected),
            target,
        )?;
        Ok(target)
    }
}
