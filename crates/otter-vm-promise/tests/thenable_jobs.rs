//! Resolve-thenable jobs: nesting, the native promise fast path and
//! at-most-once resolving functions

use otter_vm_promise::{Isolate, IsolateConfig, PromiseState, Value};

fn isolate() -> Isolate {
    Isolate::new(IsolateConfig::default()).unwrap()
}

/// Build `depth + 1` thenables, each resolving with the next; the innermost
/// resolves with `value`. Returns the outermost.
fn nested_thenable(isolate: &mut Isolate, depth: usize, value: Value) -> Value {
    let mut next = value;
    for _ in 0..=depth {
        let inner = next;
        let thenable = isolate.new_object().unwrap();
        let then = isolate
            .new_native_function(move |isolate, _, args| {
                isolate.call(args[0], Value::undefined(), &[inner])
            })
            .unwrap();
        isolate.set_property(thenable, "then", then).unwrap();
        next = thenable;
    }
    next
}

#[test]
fn test_nested_thenables_take_one_job_per_level() {
    for depth in 0..5 {
        let mut isolate = isolate();
        let promise = isolate.new_promise().unwrap();
        let thenable = nested_thenable(&mut isolate, depth, Value::int32(42));

        isolate.resolve_promise(promise, thenable).unwrap();
        assert_eq!(isolate.promise_state(promise).unwrap(), PromiseState::Pending);

        assert_eq!(isolate.run_microtasks().unwrap(), depth + 1);
        assert_eq!(
            isolate.queue().stats().resolve_thenables,
            depth as u64 + 1
        );
        assert_eq!(
            isolate.promise_state(promise).unwrap(),
            PromiseState::Fulfilled(Value::int32(42))
        );
    }
}

#[test]
fn test_native_promise_fast_path_allocates_nothing() {
    let mut isolate = isolate();
    let inner = isolate.new_promise().unwrap();
    isolate.fulfill_promise(inner, Value::int32(3)).unwrap();
    let outer = isolate.new_promise().unwrap();
    let live_before = isolate.heap().live_count();

    isolate
        .resolve_promise(outer, Value::promise(inner))
        .unwrap();
    assert_eq!(isolate.run_microtasks().unwrap(), 2);

    let stats = isolate.queue().stats();
    assert_eq!(stats.resolve_thenables, 1);
    assert_eq!(stats.fulfill_reactions, 1);
    assert_eq!(
        isolate.promise_state(outer).unwrap(),
        PromiseState::Fulfilled(Value::int32(3))
    );
    // No resolving functions, no derived promise, job cells freed
    assert_eq!(isolate.heap().live_count(), live_before);
}

#[test]
fn test_adopting_pending_native_promise() {
    let mut isolate = isolate();
    let inner = isolate.new_promise().unwrap();
    let outer = isolate.new_promise().unwrap();

    isolate
        .resolve_promise(outer, Value::promise(inner))
        .unwrap();
    assert_eq!(isolate.run_microtasks().unwrap(), 1);
    assert_eq!(isolate.pending_reactions(inner).unwrap().len(), 1);

    isolate.reject_promise(inner, Value::int32(8)).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(outer).unwrap(),
        PromiseState::Rejected(Value::int32(8))
    );
}

#[test]
fn test_overridden_then_takes_slow_path() {
    let mut isolate = isolate();
    let inner = isolate.new_promise().unwrap();
    let custom = isolate
        .new_native_function(|isolate, _, args| {
            isolate.call(args[0], Value::undefined(), &[Value::int32(77)])
        })
        .unwrap();
    isolate
        .set_property(Value::promise(inner), "then", custom)
        .unwrap();

    let outer = isolate.new_promise().unwrap();
    isolate
        .resolve_promise(outer, Value::promise(inner))
        .unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(outer).unwrap(),
        PromiseState::Fulfilled(Value::int32(77))
    );
    assert_eq!(isolate.promise_state(inner).unwrap(), PromiseState::Pending);
}

#[test]
fn test_intrinsic_then_on_plain_object_rejects() {
    let mut isolate = isolate();
    let thenable = isolate.new_object().unwrap();
    let then = isolate.intrinsic_then();
    isolate.set_property(thenable, "then", then).unwrap();

    let promise = isolate.new_promise().unwrap();
    isolate.resolve_promise(promise, thenable).unwrap();
    isolate.run_microtasks().unwrap();

    let PromiseState::Rejected(reason) = isolate.promise_state(promise).unwrap() else {
        panic!("expected rejection");
    };
    assert_eq!(
        isolate.error_message(reason),
        Some("TypeError: Promise.prototype.then called on incompatible receiver")
    );
}

#[test]
fn test_resolving_functions_are_at_most_once() {
    let mut isolate = isolate();
    let thenable = isolate.new_object().unwrap();
    let then = isolate
        .new_native_function(|isolate, _, args| {
            let (resolve, reject) = (args[0], args[1]);
            isolate.call(resolve, Value::undefined(), &[Value::int32(1)])?;
            isolate.call(reject, Value::undefined(), &[Value::int32(2)])?;
            isolate.call(resolve, Value::undefined(), &[Value::int32(3)])
        })
        .unwrap();
    isolate.set_property(thenable, "then", then).unwrap();

    let promise = isolate.new_promise().unwrap();
    isolate.resolve_promise(promise, thenable).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(promise).unwrap(),
        PromiseState::Fulfilled(Value::int32(1))
    );
}

#[test]
fn test_throw_after_resolve_is_ignored() {
    let mut isolate = isolate();
    let thenable = isolate.new_object().unwrap();
    let then = isolate
        .new_native_function(|isolate, _, args| {
            isolate.call(args[0], Value::undefined(), &[Value::int32(5)])?;
            Err(otter_vm_promise::PromiseError::exception(Value::int32(6)))
        })
        .unwrap();
    isolate.set_property(thenable, "then", then).unwrap();

    let promise = isolate.new_promise().unwrap();
    isolate.resolve_promise(promise, thenable).unwrap();
    isolate.run_microtasks().unwrap();
    assert_eq!(
        isolate.promise_state(promise).unwrap(),
        PromiseState::Fulfilled(Value::int32(5))
    );
}

#[test]
fn test_self_resolution_through_resolve_function() {
    let mut isolate = isolate();
    let promise = isolate.new_promise().unwrap();
    let (resolve, _) = isolate.create_resolving_functions(promise).unwrap();
    isolate
        .call(resolve, Value::undefined(), &[Value::promise(promise)])
        .unwrap();
    assert!(matches!(
        isolate.promise_state(promise).unwrap(),
        PromiseState::Rejected(_)
    ));
    assert!(isolate.queue().is_empty());
}
