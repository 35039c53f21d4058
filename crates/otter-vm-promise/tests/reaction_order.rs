//! Reaction ordering, handler semantics and exactly-once settlement

use otter_vm_gc::GcRef;
use otter_vm_promise::{
    Isolate, IsolateConfig, PromiseError, PromiseHook, PromiseOrCapability, PromiseState,
    RejectionEvent, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn isolate() -> Isolate {
    init_tracing();
    Isolate::new(IsolateConfig::default()).unwrap()
}

type Log = Arc<Mutex<Vec<(&'static str, Value)>>>;

/// Handler that records `(name, argument)` and returns its argument
fn recorder(isolate: &mut Isolate, log: &Log, name: &'static str) -> Value {
    let log = log.clone();
    isolate
        .new_native_function(move |_, _, args| {
            let argument = args.first().copied().unwrap_or_default();
            log.lock().push((name, argument));
            Ok(argument)
        })
        .unwrap()
}

#[test]
fn test_handlers_run_in_registration_order() {
    for count in [0usize, 1, 1000] {
        let mut isolate = isolate();
        let promise = isolate.new_promise().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for index in 0..count {
            let order = order.clone();
            let handler = isolate
                .new_native_function(move |_, _, _| {
                    order.lock().push(index);
                    Ok(Value::undefined())
                })
                .unwrap();
            isolate
                .then(promise, handler, Value::undefined())
                .unwrap();
        }

        let scheduled = isolate.fulfill_promise(promise, Value::int32(1)).unwrap();
        assert_eq!(scheduled, count);
        assert_eq!(isolate.run_microtasks().unwrap(), count);
        assert_eq!(*order.lock(), (0..count).collect::<Vec<_>>());
    }
}

#[test]
fn test_fulfillment_runs_fulfill_handlers_only() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let promise = isolate.new_promise().unwrap();
    let h1 = recorder(&mut isolate, &log, "h1");
    let h2_fulfilled = recorder(&mut isolate, &log, "h2_fulfilled");
    let h2_rejected = recorder(&mut isolate, &log, "h2_rejected");
    let h3 = recorder(&mut isolate, &log, "h3");

    isolate.then(promise, h1, Value::undefined()).unwrap();
    isolate.then(promise, h2_fulfilled, h2_rejected).unwrap();
    isolate.then(promise, Value::undefined(), h3).unwrap();

    // One job per registration; the reject-only one carries a default handler
    assert_eq!(isolate.fulfill_promise(promise, Value::int32(42)).unwrap(), 3);
    assert_eq!(isolate.queue().stats().fulfill_reactions, 3);
    assert_eq!(isolate.queue().stats().reject_reactions, 0);
    assert_eq!(isolate.run_microtasks().unwrap(), 3);

    assert_eq!(
        *log.lock(),
        vec![
            ("h1", Value::int32(42)),
            ("h2_fulfilled", Value::int32(42))
        ]
    );
}

#[test]
fn test_default_handlers_pass_through() {
    let mut isolate = isolate();
    let promise = isolate.new_promise().unwrap();
    let derived = isolate
        .then(promise, Value::undefined(), Value::undefined())
        .unwrap();
    isolate.fulfill_promise(promise, Value::int32(7)).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(derived).unwrap(),
        PromiseState::Fulfilled(Value::int32(7))
    );

    let promise = isolate.new_promise().unwrap();
    let derived = isolate
        .then(promise, Value::undefined(), Value::undefined())
        .unwrap();
    isolate.reject_promise(promise, Value::int32(8)).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(derived).unwrap(),
        PromiseState::Rejected(Value::int32(8))
    );
}

#[test]
fn test_fulfill_only_registration_rethrows_rejection() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let promise = isolate.new_promise().unwrap();
    let on_fulfilled = recorder(&mut isolate, &log, "fulfilled");
    let derived = isolate
        .then(promise, on_fulfilled, Value::undefined())
        .unwrap();

    assert_eq!(isolate.reject_promise(promise, Value::int32(13)).unwrap(), 1);
    isolate.run_microtasks().unwrap();

    assert!(log.lock().is_empty());
    assert_eq!(
        isolate.promise_state(derived).unwrap(),
        PromiseState::Rejected(Value::int32(13))
    );
}

#[test]
fn test_reject_only_registration_passes_value_through() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let promise = isolate.new_promise().unwrap();
    let on_rejected = recorder(&mut isolate, &log, "rejected");
    let derived = isolate
        .then(promise, Value::undefined(), on_rejected)
        .unwrap();

    assert_eq!(isolate.fulfill_promise(promise, Value::int32(21)).unwrap(), 1);
    isolate.run_microtasks().unwrap();

    assert!(log.lock().is_empty());
    assert_eq!(
        isolate.promise_state(derived).unwrap(),
        PromiseState::Fulfilled(Value::int32(21))
    );
}

#[test]
fn test_settlement_happens_once() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let promise = isolate.new_promise().unwrap();
    let on_fulfilled = recorder(&mut isolate, &log, "fulfilled");
    let on_rejected = recorder(&mut isolate, &log, "rejected");
    isolate.then(promise, on_fulfilled, on_rejected).unwrap();

    assert_eq!(isolate.fulfill_promise(promise, Value::int32(1)).unwrap(), 1);
    assert_eq!(isolate.reject_promise(promise, Value::int32(2)).unwrap(), 0);
    assert_eq!(isolate.fulfill_promise(promise, Value::int32(3)).unwrap(), 0);
    isolate.run_microtasks().unwrap();

    assert_eq!(*log.lock(), vec![("fulfilled", Value::int32(1))]);
    assert_eq!(
        isolate.promise_state(promise).unwrap(),
        PromiseState::Fulfilled(Value::int32(1))
    );
}

#[test]
fn test_throwing_handler_rejects_derived_promise() {
    let mut isolate = isolate();
    let promise = isolate.new_promise().unwrap();
    let thrower = isolate
        .new_native_function(|_, _, _| Err(PromiseError::exception(Value::int32(99))))
        .unwrap();
    let derived = isolate.then(promise, thrower, Value::undefined()).unwrap();

    isolate.fulfill_promise(promise, Value::int32(1)).unwrap();
    assert_eq!(isolate.run_microtasks().unwrap(), 1);
    assert_eq!(
        isolate.promise_state(derived).unwrap(),
        PromiseState::Rejected(Value::int32(99))
    );
}

#[test]
fn test_handler_result_resolves_derived_promise() {
    let mut isolate = isolate();
    let promise = isolate.new_promise().unwrap();
    let double = isolate
        .new_native_function(|_, _, args| {
            let n = args.first().and_then(|v| v.as_int32()).unwrap_or(0);
            Ok(Value::int32(n * 2))
        })
        .unwrap();
    let derived = isolate.then(promise, double, Value::undefined()).unwrap();
    let chained = isolate.then(derived, double, Value::undefined()).unwrap();

    isolate.fulfill_promise(promise, Value::int32(5)).unwrap();
    assert_eq!(isolate.run_microtasks().unwrap(), 2);
    assert_eq!(
        isolate.promise_state(chained).unwrap(),
        PromiseState::Fulfilled(Value::int32(20))
    );
}

#[test]
fn test_then_on_settled_promise_enqueues_fresh_job() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let promise = isolate.new_promise().unwrap();
    isolate.reject_promise(promise, Value::int32(3)).unwrap();
    assert!(isolate.queue().is_empty());

    let on_rejected = recorder(&mut isolate, &log, "rejected");
    isolate
        .then(promise, Value::undefined(), on_rejected)
        .unwrap();
    assert_eq!(isolate.queue().len(), 1);
    assert_eq!(isolate.queue().stats().reject_reactions, 1);

    isolate.run_microtasks().unwrap();
    assert_eq!(*log.lock(), vec![("rejected", Value::int32(3))]);
}

#[test]
fn test_capability_receives_outcome() {
    let mut isolate = isolate();
    let promise = isolate.new_promise().unwrap();
    let capability = isolate.new_promise_capability().unwrap();
    let record = isolate.capability(capability).unwrap();
    let target = record.promise.as_promise().unwrap();

    let plus_one = isolate
        .new_native_function(|_, _, args| {
            let n = args.first().and_then(|v| v.as_int32()).unwrap_or(0);
            Ok(Value::int32(n + 1))
        })
        .unwrap();
    isolate
        .then_with_capability(promise, plus_one, Value::undefined(), capability)
        .unwrap();

    isolate.fulfill_promise(promise, Value::int32(4)).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(target).unwrap(),
        PromiseState::Fulfilled(Value::int32(5))
    );
}

#[test]
fn test_throwing_capability_function_is_reported() {
    let mut isolate = isolate();
    let promise = isolate.new_promise().unwrap();
    let target = Value::promise(isolate.new_promise().unwrap());
    let thrower = isolate
        .new_native_function(|_, _, _| Err(PromiseError::exception(Value::int32(-1))))
        .unwrap();
    let capability = isolate.new_capability(target, thrower, thrower).unwrap();
    isolate
        .then_with_capability(promise, Value::undefined(), Value::undefined(), capability)
        .unwrap();

    let log: Log = Arc::default();
    let later = recorder(&mut isolate, &log, "later");
    let other = isolate.new_promise().unwrap();
    isolate.then(other, later, Value::undefined()).unwrap();

    isolate.fulfill_promise(promise, Value::int32(0)).unwrap();
    isolate.fulfill_promise(other, Value::int32(1)).unwrap();

    let err = isolate.run_microtasks().unwrap_err();
    assert_eq!(err.thrown_value(), Some(Value::int32(-1)));
    // The drain kept going after the exception
    assert_eq!(*log.lock(), vec![("later", Value::int32(1))]);
    assert!(isolate.queue().is_empty());
}

#[test]
fn test_await_without_hooks_has_no_dependent_promise() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let resume = recorder(&mut isolate, &log, "resume");
    let promise = isolate.new_promise().unwrap();

    let target = isolate
        .await_value(Value::promise(promise), resume, Value::undefined())
        .unwrap();
    assert_eq!(target, PromiseOrCapability::Undefined);

    isolate.fulfill_promise(promise, Value::int32(6)).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(*log.lock(), vec![("resume", Value::int32(6))]);
}

#[test]
fn test_await_plain_value_resumes_next_job() {
    let mut isolate = isolate();
    let log: Log = Arc::default();
    let resume = recorder(&mut isolate, &log, "resume");

    isolate
        .await_value(Value::int32(11), resume, Value::undefined())
        .unwrap();
    assert!(log.lock().is_empty());
    assert_eq!(isolate.run_microtasks().unwrap(), 1);
    assert_eq!(*log.lock(), vec![("resume", Value::int32(11))]);
}

#[derive(Default)]
struct RecordingHook {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl PromiseHook for RecordingHook {
    fn init(&mut self, _promise: GcRef, _parent: Option<GcRef>) {
        self.events.lock().push("init");
    }

    fn resolve(&mut self, _promise: GcRef) {
        self.events.lock().push("resolve");
    }

    fn before(&mut self, _target: PromiseOrCapability) {
        self.events.lock().push("before");
    }

    fn after(&mut self, _target: PromiseOrCapability) {
        self.events.lock().push("after");
    }
}

#[test]
fn test_await_with_hooks_allocates_throwaway_promise() {
    let mut isolate = isolate();
    let hook = RecordingHook::default();
    let events = hook.events.clone();
    isolate.set_promise_hook(hook);
    assert!(isolate.promise_hooks_enabled());

    let promise = isolate.new_promise().unwrap();
    let target = isolate
        .await_value(Value::promise(promise), Value::undefined(), Value::undefined())
        .unwrap();
    let PromiseOrCapability::Promise(throwaway) = target else {
        panic!("expected a throwaway promise, got {:?}", target);
    };

    isolate.fulfill_promise(promise, Value::int32(2)).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(throwaway).unwrap(),
        PromiseState::Fulfilled(Value::int32(2))
    );
    assert_eq!(
        *events.lock(),
        vec!["init", "init", "resolve", "before", "resolve", "after"]
    );

    isolate.clear_promise_hook();
    assert!(!isolate.promise_hooks_enabled());
}

#[test]
fn test_hooks_enabled_by_config() {
    init_tracing();
    let config = IsolateConfig::from_json(r#"{ "promise_hooks": true }"#).unwrap();
    let mut isolate = Isolate::new(config).unwrap();
    let promise = isolate.new_promise().unwrap();
    let target = isolate
        .await_value(Value::promise(promise), Value::undefined(), Value::undefined())
        .unwrap();
    assert!(matches!(target, PromiseOrCapability::Promise(_)));
}

#[test]
fn test_rejection_tracking() {
    let mut isolate = isolate();
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        isolate.set_rejection_tracker(move |promise, event| events.lock().push((promise, event)));
    }

    let promise = isolate.new_promise().unwrap();
    isolate.reject_promise(promise, Value::int32(1)).unwrap();
    assert_eq!(
        *events.lock(),
        vec![(promise, RejectionEvent::RejectWithNoHandler)]
    );

    isolate
        .then(promise, Value::undefined(), Value::undefined())
        .unwrap();
    isolate
        .then(promise, Value::undefined(), Value::undefined())
        .unwrap();
    assert_eq!(
        *events.lock(),
        vec![
            (promise, RejectionEvent::RejectWithNoHandler),
            (promise, RejectionEvent::HandlerAddedAfterReject),
        ]
    );

    // A handled promise is not reported
    let handled = isolate.new_promise().unwrap();
    let derived = isolate
        .then(handled, Value::undefined(), Value::undefined())
        .unwrap();
    isolate.reject_promise(handled, Value::int32(2)).unwrap();
    assert_eq!(events.lock().len(), 2);

    // The derived promise rejects with nobody listening
    isolate.run_microtasks().unwrap();
    assert_eq!(
        events.lock().last(),
        Some(&(derived, RejectionEvent::RejectWithNoHandler))
    );
}
