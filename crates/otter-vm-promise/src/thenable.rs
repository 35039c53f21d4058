//! Resolve-thenable jobs
//!
//! Resolving a promise with an object that has a callable `then` defers the
//! call to a job, so user `then` code never runs synchronously inside
//! `resolve`.

use crate::error::{PromiseError, PromiseResult};
use crate::isolate::Isolate;
use crate::layout::{Handler, MicrotaskKind, PromiseOrCapability, PromiseResolveThenableJobTask};
use crate::microtask::{JobQueue, Microtask};
use crate::value::Value;
use otter_vm_gc::GcRef;
use smallvec::{SmallVec, smallvec};

impl Isolate {
    /// Schedule `then.call(thenable, resolve, reject)` for `promise_to_resolve`
    pub fn enqueue_resolve_thenable_job(
        &mut self,
        promise_to_resolve: GcRef,
        thenable: Value,
        then: GcRef,
    ) -> PromiseResult<GcRef> {
        let task = PromiseResolveThenableJobTask {
            context: self.function_context(then)?,
            promise_to_resolve,
            then,
            thenable,
        };
        let kind = MicrotaskKind::ResolveThenable;
        let cell = self
            .heap()
            .allocate(kind.instance_type().tag(), &task.to_words())?;
        self.queue().enqueue(Microtask::new(cell, kind));

        tracing::trace!(
            target: "otter::microtask",
            promise = %promise_to_resolve,
            job = %cell,
            "resolve-thenable job enqueued"
        );
        Ok(cell)
    }

    /// Adopt the state of the thenable
    pub(crate) fn run_resolve_thenable_job(
        &mut self,
        job: PromiseResolveThenableJobTask,
    ) -> PromiseResult<()> {
        // A native promise with the intrinsic `then` is chained directly,
        // skipping the resolving functions and the derived promise
        if let (Some(thenable), true) = (job.thenable.as_promise(), self.is_intrinsic_then(job.then)) {
            return self.perform_then(
                thenable,
                Handler::Default,
                Handler::Default,
                PromiseOrCapability::Promise(job.promise_to_resolve),
            );
        }

        let (resolve, reject) = self.create_resolving_functions(job.promise_to_resolve)?;
        let args: SmallVec<[Value; 2]> = smallvec![resolve, reject];
        match self.with_context(job.context, |isolate| {
            isolate.call(Value::function(job.then), job.thenable, &args)
        }) {
            Ok(_) => Ok(()),
            Err(PromiseError::Exception(reason)) => {
                self.call(reject, Value::undefined(), &[reason])?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolateConfig;
    use crate::promise::PromiseState;

    #[test]
    fn test_resolving_with_thenable_defers_the_call() {
        let mut isolate = Isolate::new(IsolateConfig::default()).unwrap();
        let promise = isolate.new_promise().unwrap();
        let thenable = isolate.new_object().unwrap();
        let then = isolate
            .new_native_function(|isolate, _, args| {
                isolate.call(args[0], Value::undefined(), &[Value::int32(5)])
            })
            .unwrap();
        isolate.set_property(thenable, "then", then).unwrap();

        isolate.resolve_promise(promise, thenable).unwrap();
        assert_eq!(isolate.promise_state(promise).unwrap(), PromiseState::Pending);
        assert_eq!(isolate.queue().stats().resolve_thenables, 1);

        isolate.run_microtasks().unwrap();
        assert_eq!(
            isolate.promise_state(promise).unwrap(),
            PromiseState::Fulfilled(Value::int32(5))
        );
    }

    #[test]
    fn test_throwing_then_rejects() {
        let mut isolate = Isolate::new(IsolateConfig::default()).unwrap();
        let promise = isolate.new_promise().unwrap();
        let thenable = isolate.new_object().unwrap();
        let then = isolate
            .new_native_function(|_, _, _| Err(PromiseError::exception(Value::int32(13))))
            .unwrap();
        isolate.set_property(thenable, "then", then).unwrap();

        isolate.resolve_promise(promise, thenable).unwrap();
        isolate.run_microtasks().unwrap();
        assert_eq!(
            isolate.promise_state(promise).unwrap(),
            PromiseState::Rejected(Value::int32(13))
        );
    }
}
