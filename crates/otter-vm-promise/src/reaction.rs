//! Reaction registration and the reaction list
//!
//! A pending promise holds its reactions as a singly linked list, newest
//! first: registering is a prepend. Settlement reverses the list in place
//! so jobs are scheduled in registration order.

use crate::error::{PromiseError, PromiseResult};
use crate::isolate::Isolate;
use crate::layout::{
    FieldWord, Handler, InstanceType, PromiseOrCapability, PromiseReaction, expect_instance,
};
use crate::promise::{PromiseStatus, REACTIONS_OR_RESULT_OFFSET};
use otter_vm_gc::{GcHeap, GcRef, tags};

/// Register a reaction on a pending promise, making it the new list head.
pub fn register(
    isolate: &mut Isolate,
    promise: GcRef,
    on_fulfilled: Handler,
    on_rejected: Handler,
    promise_or_capability: PromiseOrCapability,
) -> PromiseResult<GcRef> {
    let fields = isolate.promise_fields(promise)?;
    if fields.status != PromiseStatus::Pending {
        return Err(PromiseError::NotPending(promise));
    }
    let head = fields.reaction_head(promise)?;

    let reaction = PromiseReaction {
        next: head,
        reject_handler: on_rejected,
        fulfill_handler: on_fulfilled,
        promise_or_capability,
    };
    let heap = isolate.heap();
    let cell = heap.allocate(tags::PROMISE_REACTION, &reaction.to_words())?;
    heap.store(promise, REACTIONS_OR_RESULT_OFFSET, Some(cell).to_word())?;

    tracing::trace!(
        target: "otter::microtask",
        promise = %promise,
        reaction = %cell,
        "reaction registered"
    );
    Ok(cell)
}

/// Reverse a reaction list in place, returning the new head.
///
/// A list that revisits its head or outgrows the heap is cyclic; a node that
/// is not a pending reaction, or a link word that is neither a reaction nor
/// the terminator, is corrupt. Both fail before any link is rewritten, so a
/// rejected list is left exactly as it was.
pub fn reverse_reactions(heap: &GcHeap, head: Option<GcRef>) -> PromiseResult<Option<GcRef>> {
    let Some(first) = head else {
        return Ok(None);
    };
    let corrupt = |reason| PromiseError::CorruptReactionList { head: first, reason };

    let limit = heap.live_count();
    let mut steps = 0usize;
    let mut current = head;
    while let Some(cell) = current {
        if steps > 0 && cell == first {
            return Err(corrupt("cycle through the list head"));
        }
        steps += 1;
        if steps > limit {
            return Err(corrupt("list longer than the heap"));
        }
        if heap.tag(cell)? != tags::PROMISE_REACTION {
            return Err(corrupt("node is not a pending reaction"));
        }
        current = <Option<GcRef>>::from_word(heap.load(cell, PromiseReaction::NEXT_OFFSET)?)
            .ok_or_else(|| corrupt("link is not a reaction or the terminator"))?;
    }

    let mut reversed: Option<GcRef> = None;
    let mut current = head;
    while let Some(cell) = current {
        current = <Option<GcRef>>::from_word(heap.load(cell, PromiseReaction::NEXT_OFFSET)?)
            .ok_or_else(|| corrupt("link is not a reaction or the terminator"))?;
        heap.store(cell, PromiseReaction::NEXT_OFFSET, reversed.to_word())?;
        reversed = Some(cell);
    }
    Ok(reversed)
}

/// Guarded walk over a reaction list.
///
/// Each node's `next` is read before the node is yielded, so the caller may
/// rewrite the yielded cell. The walk stops with an error on a node that is
/// not a pending reaction or after more nodes than the heap holds.
pub struct ReactionIter<'a> {
    heap: &'a GcHeap,
    head: Option<GcRef>,
    current: Option<GcRef>,
    remaining: usize,
}

impl<'a> ReactionIter<'a> {
    /// Walk the list starting at `head`
    pub fn new(heap: &'a GcHeap, head: Option<GcRef>) -> Self {
        Self {
            heap,
            head,
            current: head,
            remaining: heap.live_count(),
        }
    }

    fn read(&self, cell: GcRef) -> PromiseResult<PromiseReaction> {
        let (tag, words) = self.heap.load_all(cell)?;
        expect_instance(cell, tag, InstanceType::PromiseReaction).map_err(|_| {
            PromiseError::CorruptReactionList {
                head: self.head.unwrap_or(cell),
                reason: "node is not a pending reaction",
            }
        })?;
        PromiseReaction::from_words(cell, &words)
    }
}

impl Iterator for ReactionIter<'_> {
    type Item = PromiseResult<(GcRef, PromiseReaction)>;

    fn next(&mut self) -> Option<Self::Item> {
        let cell = self.current?;
        if self.remaining == 0 {
            self.current = None;
            return Some(Err(PromiseError::CorruptReactionList {
                head: self.head.unwrap_or(cell),
                reason: "list longer than the heap",
            }));
        }
        self.remaining -= 1;

        match self.read(cell) {
            Ok(reaction) => {
                self.current = reaction.next;
                Some(Ok((cell, reaction)))
            }
            Err(err) => {
                self.current = None;
                Some(Err(err))
            }
        }
    }
}

impl Isolate {
    /// Reactions of a pending promise, newest first. Settled promises have none.
    pub fn pending_reactions(&self, promise: GcRef) -> PromiseResult<Vec<GcRef>> {
        let fields = self.promise_fields(promise)?;
        if fields.status != PromiseStatus::Pending {
            return Ok(Vec::new());
        }
        let head = fields.reaction_head(promise)?;
        ReactionIter::new(self.heap(), head)
            .map(|entry| entry.map(|(cell, _)| cell))
            .collect()
    }
}
