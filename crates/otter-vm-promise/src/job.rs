//! Running promise jobs
//!
//! ## Error Handling
//!
//! - A handler that throws rejects the dependent promise or capability; the
//!   job itself succeeds
//! - A throw from a capability's resolve or reject function escapes the job
//!   as a JS exception. The drain continues and reports the first one.
//! - Heap and layout errors abort the drain immediately

use crate::error::{PromiseError, PromiseResult};
use crate::isolate::Isolate;
use crate::layout::{
    Handler, MicrotaskKind, PromiseOrCapability, PromiseReactionJobTask,
    PromiseResolveThenableJobTask, ReactionType,
};
use crate::microtask::Microtask;
use crate::value::Value;

/// Run one dequeued job and free its cell
pub fn run_microtask(isolate: &mut Isolate, task: Microtask) -> PromiseResult<()> {
    let (tag, words) = isolate.heap().load_all(task.cell)?;
    let kind = MicrotaskKind::from_tag(tag).filter(|&kind| kind == task.kind);
    let Some(kind) = kind else {
        return Err(PromiseError::UnexpectedInstanceType {
            cell: task.cell,
            expected: task.kind.instance_type().name(),
            found: tag,
        });
    };

    tracing::trace!(
        target: "otter::microtask",
        job = %task.cell,
        kind = ?kind,
        "running job"
    );

    let result = match kind {
        MicrotaskKind::FulfillReaction => {
            let job = PromiseReactionJobTask::from_words(task.cell, &words)?;
            run_reaction_job(isolate, ReactionType::Fulfill, job)
        }
        MicrotaskKind::RejectReaction => {
            let job = PromiseReactionJobTask::from_words(task.cell, &words)?;
            run_reaction_job(isolate, ReactionType::Reject, job)
        }
        MicrotaskKind::ResolveThenable => {
            let job = PromiseResolveThenableJobTask::from_words(task.cell, &words)?;
            isolate.run_resolve_thenable_job(job)
        }
    };

    // Jobs run once; nothing references the cell after its queue entry
    isolate.free_cell(task.cell)?;
    result
}

/// Call the handler and forward its outcome to the dependent promise
fn run_reaction_job(
    isolate: &mut Isolate,
    reaction_type: ReactionType,
    job: PromiseReactionJobTask,
) -> PromiseResult<()> {
    isolate.with_hook(|hook| hook.before(job.promise_or_capability));

    let outcome = match job.handler {
        Handler::Default => match reaction_type {
            ReactionType::Fulfill => Ok(job.argument),
            ReactionType::Reject => Err(PromiseError::Exception(job.argument)),
        },
        Handler::Callable(function) => isolate.with_context(job.context, |isolate| {
            isolate.call(Value::function(function), Value::undefined(), &[job.argument])
        }),
    };

    let result = match (job.promise_or_capability, outcome) {
        (_, Err(err)) if err.thrown_value().is_none() => Err(err),
        (PromiseOrCapability::Undefined, _) => Ok(()),
        (PromiseOrCapability::Promise(promise), Ok(value)) => isolate.resolve_promise(promise, value),
        (PromiseOrCapability::Promise(promise), Err(err)) => {
            let reason = err.thrown_value().unwrap_or_default();
            isolate.reject_promise(promise, reason).map(|_| ())
        }
        (PromiseOrCapability::Capability(capability), outcome) => {
            let record = isolate.capability(capability)?;
            let (function, argument) = match outcome {
                Ok(value) => (record.resolve, value),
                Err(err) => (record.reject, err.thrown_value().unwrap_or_default()),
            };
            isolate
                .call(function, Value::undefined(), &[argument])
                .map(|_| ())
        }
    };

    isolate.with_hook(|hook| hook.after(job.promise_or_capability));
    result
}

impl Isolate {
    /// Drain the microtask queue.
    ///
    /// Runs jobs in FIFO order until the queue is empty or the configured
    /// budget is spent, including jobs enqueued by running jobs. Returns the
    /// number of jobs run, or the first JS exception that escaped a job.
    pub fn run_microtasks(&mut self) -> PromiseResult<usize> {
        let budget = self.config().drain_budget.unwrap_or(usize::MAX);
        let mut ran = 0;
        let mut first_exception = None;

        while ran < budget {
            let Some(task) = self.queue().dequeue() else {
                break;
            };
            match run_microtask(self, task) {
                Ok(()) => {}
                Err(PromiseError::Exception(value)) => {
                    tracing::warn!(
                        target: "otter::microtask",
                        job = %task.cell,
                        exception = ?value,
                        "exception escaped a job"
                    );
                    first_exception.get_or_insert(value);
                }
                Err(err) => {
                    tracing::error!(
                        target: "otter::microtask",
                        job = %task.cell,
                        error = %err,
                        "job failed"
                    );
                    return Err(err);
                }
            }
            ran += 1;
        }

        tracing::debug!(
            target: "otter::microtask",
            ran,
            pending = self.queue().len(),
            "microtask drain finished"
        );
        match first_exception {
            Some(value) => Err(PromiseError::Exception(value)),
            None => Ok(ran),
        }
    }
}
