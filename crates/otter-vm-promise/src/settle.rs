//! Promise settlement
//!
//! Settling reverses the reaction list so jobs run in registration order,
//! writes the terminal state into the promise, then turns every registered
//! reaction into a job without allocating: the reaction cell is reinterpreted
//! in place as a reaction job task and enqueued. A corrupt list fails the
//! reversal and leaves the promise pending.
//!
//! The in-place rewrite is observable by a concurrent marker. Each
//! reinterpreted word is written individually through the write barrier,
//! the dependent promise or capability slot is never touched, and the new
//! instance type is published after the last word.

use crate::error::PromiseResult;
use crate::hooks::RejectionEvent;
use crate::isolate::Isolate;
use crate::layout::ReactionType;
use crate::microtask::{JobQueue, Microtask};
use crate::promise::{PromiseStatus, REACTIONS_OR_RESULT_OFFSET, STATUS_OFFSET};
use crate::reaction::{ReactionIter, reverse_reactions};
use crate::value::Value;
use otter_vm_gc::{GcRef, tags};

/// Terminal outcome of a promise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Fulfilled with a value
    Fulfilled(Value),
    /// Rejected with a reason
    Rejected(Value),
}

impl Settlement {
    /// The value or reason
    pub fn value(self) -> Value {
        match self {
            Self::Fulfilled(value) | Self::Rejected(value) => value,
        }
    }

    /// Which handler of each reaction runs
    pub fn reaction_type(self) -> ReactionType {
        match self {
            Self::Fulfilled(_) => ReactionType::Fulfill,
            Self::Rejected(_) => ReactionType::Reject,
        }
    }

    fn status(self) -> PromiseStatus {
        match self {
            Self::Fulfilled(_) => PromiseStatus::Fulfilled,
            Self::Rejected(_) => PromiseStatus::Rejected,
        }
    }
}

/// Settle a promise and schedule its reactions, returning how many jobs were
/// enqueued. Settling an already settled promise does nothing.
pub fn settle(isolate: &mut Isolate, promise: GcRef, settlement: Settlement) -> PromiseResult<usize> {
    let fields = isolate.promise_fields(promise)?;
    if fields.status != PromiseStatus::Pending {
        tracing::trace!(
            target: "otter::microtask",
            promise = %promise,
            "ignoring settlement of a settled promise"
        );
        return Ok(0);
    }
    let head = fields.reaction_head(promise)?;
    let reversed = reverse_reactions(isolate.heap(), head)?;

    // The result replaces the list head; the list is only reachable from `reversed` now
    let heap = isolate.heap();
    heap.store(
        promise,
        REACTIONS_OR_RESULT_OFFSET,
        settlement.value().to_word(),
    )?;
    heap.store(promise, STATUS_OFFSET, settlement.status().to_word())?;

    if matches!(settlement, Settlement::Rejected(_)) && !fields.has_handler() {
        isolate.report_rejection(promise, RejectionEvent::RejectWithNoHandler);
    }
    isolate.with_hook(|hook| hook.resolve(promise));

    let scheduled = trigger_reactions(
        isolate,
        reversed,
        settlement.value(),
        settlement.reaction_type(),
    )?;

    tracing::debug!(
        target: "otter::microtask",
        promise = %promise,
        outcome = ?settlement.reaction_type(),
        jobs = scheduled,
        "promise settled"
    );
    Ok(scheduled)
}

/// Morph each reaction of a detached, oldest-first list into a job and
/// enqueue it
fn trigger_reactions(
    isolate: &mut Isolate,
    reversed: Option<GcRef>,
    argument: Value,
    reaction_type: ReactionType,
) -> PromiseResult<usize> {
    let heap = isolate.heap().clone();
    let kind = reaction_type.job_kind();
    let job_tag = kind.instance_type().tag();

    let mut scheduled = 0;
    // The iterator has already read `next` when a cell is yielded, so the
    // cell can be rewritten before the walk moves on
    for entry in ReactionIter::new(&heap, reversed) {
        let (cell, reaction) = entry?;
        let context = isolate.handler_context(reaction.handler(reaction_type))?;
        let task = reaction.into_job_task(reaction_type, argument, context);
        heap.morph(cell, tags::PROMISE_REACTION, job_tag, &task.morph_writes())?;
        isolate.queue().enqueue(Microtask::new(cell, kind));
        scheduled += 1;
    }
    Ok(scheduled)
}
