//! Isolate: heap, job queue and the builtins promise jobs call into
//!
//! Functions are heap cells with three words: the context they run in, a
//! bound target (the promise of a resolving function) and a bound record
//! (its already-resolved flag). What a function does is kept in a side table
//! keyed by the cell, as are object properties and error messages.

use crate::config::IsolateConfig;
use crate::error::{PromiseError, PromiseResult};
use crate::hooks::{PromiseHook, RejectionEvent, RejectionTracker};
use crate::layout::{ContextRef, FieldWord, Handler, InstanceType, decode_field, expect_instance};
use crate::microtask::MicrotaskQueue;
use crate::value::Value;
use otter_vm_gc::tagged::{TAG_UNDEFINED, encode_int32};
use otter_vm_gc::{GcHeap, GcRef, tags};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Native function signature: `(isolate, this, args)`
pub type NativeFn =
    Arc<dyn Fn(&mut Isolate, Value, &[Value]) -> PromiseResult<Value> + Send + Sync>;

/// Behavior of a function cell
#[derive(Clone)]
pub(crate) enum Builtin {
    /// Host closure
    Native(NativeFn),
    /// Resolve half of a resolving function pair
    Resolve,
    /// Reject half of a resolving function pair
    Reject,
    /// The intrinsic `Promise.prototype.then`
    PromiseThen,
}

/// Word layout of a function cell
pub(crate) struct FunctionLayout;

impl FunctionLayout {
    pub const CONTEXT_OFFSET: usize = 0;
    pub const TARGET_OFFSET: usize = 1;
    pub const RECORD_OFFSET: usize = 2;
    pub const SIZE: usize = 3;
}

/// An isolated promise runtime
pub struct Isolate {
    config: IsolateConfig,
    heap: Arc<GcHeap>,
    queue: Arc<MicrotaskQueue>,
    native_context: ContextRef,
    current_context: ContextRef,
    intrinsic_then: GcRef,
    next_context_id: i32,
    builtins: FxHashMap<GcRef, Builtin>,
    properties: FxHashMap<GcRef, FxHashMap<String, Value>>,
    error_messages: FxHashMap<GcRef, String>,
    hook: Option<Box<dyn PromiseHook>>,
    rejection_tracker: Option<RejectionTracker>,
}

impl Isolate {
    /// Create an isolate with its native context and intrinsics
    pub fn new(config: IsolateConfig) -> PromiseResult<Self> {
        let heap = GcHeap::with_config(config.gc_config());
        let native_context = ContextRef(heap.allocate(tags::NATIVE_CONTEXT, &[encode_int32(0)])?);
        let intrinsic_then = heap.allocate(
            tags::FUNCTION,
            &[native_context.to_word(), TAG_UNDEFINED, TAG_UNDEFINED],
        )?;

        let mut builtins = FxHashMap::default();
        builtins.insert(intrinsic_then, Builtin::PromiseThen);

        tracing::debug!(
            target: "otter::microtask",
            promise_hooks = config.promise_hooks,
            drain_budget = ?config.drain_budget,
            "isolate created"
        );

        Ok(Self {
            config,
            heap,
            queue: Arc::new(MicrotaskQueue::new()),
            native_context,
            current_context: native_context,
            intrinsic_then,
            next_context_id: 1,
            builtins,
            properties: FxHashMap::default(),
            error_messages: FxHashMap::default(),
            hook: None,
            rejection_tracker: None,
        })
    }

    /// Isolate configuration
    pub fn config(&self) -> &IsolateConfig {
        &self.config
    }

    /// The heap, shareable with a marker thread
    pub fn heap(&self) -> &Arc<GcHeap> {
        &self.heap
    }

    /// The microtask queue
    pub fn queue(&self) -> &Arc<MicrotaskQueue> {
        &self.queue
    }

    /// The intrinsic `Promise.prototype.then`
    pub fn intrinsic_then(&self) -> Value {
        Value::function(self.intrinsic_then)
    }

    pub(crate) fn is_intrinsic_then(&self, function: GcRef) -> bool {
        function == self.intrinsic_then
    }

    // ==================== Contexts ====================

    /// Context the isolate was created with
    pub fn native_context(&self) -> ContextRef {
        self.native_context
    }

    /// Context of the running code
    pub fn current_context(&self) -> ContextRef {
        self.current_context
    }

    /// Allocate a fresh execution context
    pub fn new_context(&mut self) -> PromiseResult<ContextRef> {
        let id = self.next_context_id;
        self.next_context_id += 1;
        Ok(ContextRef(
            self.heap.allocate(tags::NATIVE_CONTEXT, &[encode_int32(id)])?,
        ))
    }

    /// Make `context` current, returning the previous one
    pub fn enter_context(&mut self, context: ContextRef) -> ContextRef {
        std::mem::replace(&mut self.current_context, context)
    }

    /// Run `f` with `context` current
    pub fn with_context<R>(&mut self, context: ContextRef, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.enter_context(context);
        let result = f(self);
        self.enter_context(previous);
        result
    }

    // ==================== Objects ====================

    /// Allocate an empty object
    pub fn new_object(&mut self) -> PromiseResult<Value> {
        Ok(Value::object(self.heap.allocate(tags::OBJECT, &[])?))
    }

    /// Set an own property
    pub fn set_property(&mut self, target: Value, key: &str, value: Value) -> PromiseResult<()> {
        let Some(object) = target.as_object() else {
            return Err(self.type_error(&format!(
                "Cannot set property '{}' on {:?}",
                key, target
            )));
        };
        // Fails on a freed cell
        self.heap.tag(object)?;
        self.properties
            .entry(object)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Get a property. Native promises inherit the intrinsic `then`.
    pub fn get_property(&self, target: Value, key: &str) -> Value {
        let Some(object) = target.as_object() else {
            return Value::undefined();
        };
        if let Some(value) = self.properties.get(&object).and_then(|props| props.get(key)) {
            return *value;
        }
        if key == "then" && target.as_promise().is_some() {
            return self.intrinsic_then();
        }
        Value::undefined()
    }

    // ==================== Functions ====================

    /// Create a function backed by a host closure, bound to the current context
    pub fn new_native_function<F>(&mut self, f: F) -> PromiseResult<Value>
    where
        F: Fn(&mut Isolate, Value, &[Value]) -> PromiseResult<Value> + Send + Sync + 'static,
    {
        let function =
            self.new_builtin_function(Builtin::Native(Arc::new(f)), TAG_UNDEFINED, TAG_UNDEFINED)?;
        Ok(Value::function(function))
    }

    pub(crate) fn new_builtin_function(
        &mut self,
        builtin: Builtin,
        target: u64,
        record: u64,
    ) -> PromiseResult<GcRef> {
        let mut words = [TAG_UNDEFINED; FunctionLayout::SIZE];
        words[FunctionLayout::CONTEXT_OFFSET] = self.current_context.to_word();
        words[FunctionLayout::TARGET_OFFSET] = target;
        words[FunctionLayout::RECORD_OFFSET] = record;
        let function = self.heap.allocate(tags::FUNCTION, &words)?;
        self.builtins.insert(function, builtin);
        Ok(function)
    }

    /// Instance type of a cell, if it is one this crate knows
    pub fn instance_type(&self, cell: GcRef) -> PromiseResult<Option<InstanceType>> {
        Ok(InstanceType::from_tag(self.heap.tag(cell)?))
    }

    /// Words of a function cell
    pub(crate) fn function_words(&self, function: GcRef) -> PromiseResult<Vec<u64>> {
        let (tag, words) = self.heap.load_all(function)?;
        expect_instance(function, tag, InstanceType::JsFunction)?;
        Ok(words)
    }

    /// Context a function runs in
    pub fn function_context(&self, function: GcRef) -> PromiseResult<ContextRef> {
        let words = self.function_words(function)?;
        decode_field(function, &words, FunctionLayout::CONTEXT_OFFSET, "context")
    }

    /// Context a reaction job for `handler` runs in
    pub(crate) fn handler_context(&self, handler: Handler) -> PromiseResult<ContextRef> {
        match handler {
            Handler::Callable(function) => self.function_context(function),
            Handler::Default => Ok(self.current_context),
        }
    }

    /// Call a function in its own context
    pub fn call(&mut self, callee: Value, this: Value, args: &[Value]) -> PromiseResult<Value> {
        let Some(function) = callee.as_function() else {
            return Err(self.type_error(&format!("{:?} is not a function", callee)));
        };
        let context = self.function_context(function)?;
        let builtin = self
            .builtins
            .get(&function)
            .cloned()
            .ok_or(PromiseError::MalformedField {
                cell: function,
                field: "code",
            })?;
        let argument = args.first().copied().unwrap_or_default();

        self.with_context(context, |isolate| match builtin {
            Builtin::Native(f) => f(isolate, this, args),
            Builtin::Resolve => isolate.run_resolve_function(function, argument),
            Builtin::Reject => isolate.run_reject_function(function, argument),
            Builtin::PromiseThen => isolate.promise_then_builtin(this, args),
        })
    }

    // ==================== Errors ====================

    /// Create a TypeError object
    pub fn new_type_error(&mut self, message: &str) -> PromiseResult<Value> {
        let error = self.new_object()?;
        if let Some(object) = error.as_object() {
            self.error_messages
                .insert(object, format!("TypeError: {}", message));
        }
        Ok(error)
    }

    /// A thrown TypeError, or the heap error that prevented creating one
    pub(crate) fn type_error(&mut self, message: &str) -> PromiseError {
        match self.new_type_error(message) {
            Ok(error) => PromiseError::Exception(error),
            Err(err) => err,
        }
    }

    /// Message of an error object created by this isolate
    pub fn error_message(&self, error: Value) -> Option<&str> {
        let object = error.as_object()?;
        self.error_messages.get(&object).map(String::as_str)
    }

    // ==================== Hooks ====================

    /// Install a promise hook
    pub fn set_promise_hook(&mut self, hook: impl PromiseHook + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Remove the promise hook
    pub fn clear_promise_hook(&mut self) {
        self.hook = None;
    }

    /// Whether hook events are observable, by configuration or an installed hook
    pub fn promise_hooks_enabled(&self) -> bool {
        self.config.promise_hooks || self.hook.is_some()
    }

    pub(crate) fn with_hook(&mut self, f: impl FnOnce(&mut dyn PromiseHook)) {
        if let Some(hook) = self.hook.as_deref_mut() {
            f(hook);
        }
    }

    /// Install the host rejection tracker
    pub fn set_rejection_tracker<F>(&mut self, tracker: F)
    where
        F: FnMut(GcRef, RejectionEvent) + Send + 'static,
    {
        self.rejection_tracker = Some(Box::new(tracker));
    }

    pub(crate) fn report_rejection(&mut self, promise: GcRef, event: RejectionEvent) {
        tracing::debug!(
            target: "otter::microtask",
            promise = %promise,
            event = ?event,
            "rejection tracker event"
        );
        if let Some(tracker) = self.rejection_tracker.as_mut() {
            tracker(promise, event);
        }
    }

    // ==================== GC ====================

    /// Cells the isolate keeps alive: intrinsics and queued jobs
    pub fn gc_roots(&self) -> Vec<GcRef> {
        let mut roots = vec![self.native_context.0, self.intrinsic_then];
        self.queue.trace_roots(&mut |cell| roots.push(cell));
        roots
    }

    /// Free a cell and drop everything the side tables hold for it, so a
    /// recycled slot starts without properties, behavior or a message
    pub fn free_cell(&mut self, cell: GcRef) -> PromiseResult<()> {
        self.builtins.remove(&cell);
        self.properties.remove(&cell);
        self.error_messages.remove(&cell);
        self.heap.free(cell)?;
        Ok(())
    }
}
