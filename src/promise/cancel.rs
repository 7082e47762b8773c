//! Cancellation
//!
//! Cancelling a Started promise runs its cancellation hook, lets its
//! `finally` handlers observe the cancellation, releases its parents, and
//! cancels every promise consuming it. A parent is released upward only
//! once every one of its consumers has been cancelled.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, trace, warn};

use super::{panic_message, Promise, PromiseId, Resolver, Status};
use crate::runtime::Runtime;
use crate::value::Values;

impl Promise {
    /// Cancel this promise. No effect unless it is Started.
    pub fn cancel(&self) {
        let id = self.id;
        let cancelled = self.rt.with_mut(|inner| {
            let node = inner.nodes.get_mut(&id)?;
            if node.status != Status::Started {
                return None;
            }
            node.status = Status::Cancelled;
            let hook = node.cancel_hook.take();
            let reactions = std::mem::take(&mut node.reactions);
            let parents = node.parents.clone();
            let consumers = node.consumers.clone();
            let task = node.task.take();
            inner.stats.promises_cancelled += 1;

            // A cancelled node leaves its parents' consumer and reaction lists
            let mut detached = Vec::new();
            for parent in &parents {
                if let Some(node) = inner.nodes.get_mut(parent) {
                    node.consumers.retain(|consumer| *consumer != id);
                    let (ours, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut node.reactions)
                        .into_iter()
                        .partition(|(consumer, _)| *consumer == id);
                    node.reactions = kept;
                    detached.extend(ours);
                }
            }
            Some((hook, reactions, parents, consumers, task, detached))
        });
        let Some((hook, reactions, parents, consumers, task, detached)) = cancelled else {
            return;
        };
        drop(detached);
        trace!(promise = %id, "cancelled");

        if let Some(hook) = hook {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
                warn!(
                    promise = %id,
                    panic = %panic_message(&*payload),
                    "cancellation hook panicked"
                );
            }
        }
        if let Some(task) = task {
            debug!(promise = %id, task = %task, "aborting executor task");
            self.rt.abort_task(task);
        }
        for (_, reaction) in reactions {
            reaction(Status::Cancelled, Values::new());
        }
        for parent in parents {
            self.rt.consumer_cancelled(parent);
        }
        for consumer in consumers {
            if let Some(consumer) = self.rt.handle(consumer) {
                consumer.cancel();
            }
        }
    }
}

impl Runtime {
    /// Cancel `parent` if it is Started and no live consumer remains.
    /// Cancelled consumers detach themselves; ids of reclaimed nodes count
    /// as gone.
    pub(crate) fn consumer_cancelled(&self, parent: PromiseId) {
        let release = self.with(|inner| {
            let Some(node) = inner.nodes.get(&parent) else {
                return false;
            };
            node.status == Status::Started
                && !node.consumers.iter().any(|consumer| {
                    inner
                        .nodes
                        .get(consumer)
                        .is_some_and(|node| node.status != Status::Cancelled)
                })
        });
        if release {
            if let Some(parent) = self.handle(parent) {
                parent.cancel();
            }
        }
    }
}

impl Resolver {
    /// Register the cancellation hook. Returns whether the promise is
    /// already cancelled, in which case `hook` has run immediately. Only
    /// the first registration on a Started promise is kept.
    pub fn on_cancel<F>(&self, hook: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        enum Registration<F> {
            Kept,
            RunNow(F),
            Ignored(F),
        }

        let id = self.promise.id;
        let registration = self.promise.rt.with_mut(|inner| match inner.nodes.get_mut(&id) {
            Some(node) if node.status == Status::Started && node.cancel_hook.is_none() => {
                node.cancel_hook = Some(Box::new(hook));
                Registration::Kept
            }
            Some(node) if node.status != Status::Cancelled => Registration::Ignored(hook),
            _ => Registration::RunNow(hook),
        });
        match registration {
            Registration::Kept => false,
            Registration::RunNow(hook) => {
                hook();
                true
            }
            Registration::Ignored(hook) => {
                if self.promise.status() == Status::Started {
                    debug!(promise = %id, "cancellation hook already registered; ignoring");
                }
                drop(hook);
                false
            }
        }
    }
}
