//! Cancellable promises
//!
//! A [`Promise`] is a handle to a node in its [`Runtime`]'s arena. Nodes move
//! from Started to exactly one of Resolved, Rejected or Cancelled, and never
//! change again. Each node records which nodes it consumes (parents) and
//! which consume it, so cancellation can travel both ways through a chain.
//!
//! The API is split by concern:
//! - settlement and construction live here
//! - continuations in [`chain`]
//! - cancellation in [`cancel`]
//! - aggregation in [`combinators`] and [`sequence`]
//! - timers in [`delay`]
//! - suspension in [`wait`]

pub mod cancel;
pub mod chain;
pub mod combinators;
pub mod delay;
pub mod sequence;
pub mod wait;

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{ErrorKind, PromiseError};
use crate::event_loop::TaskId;
use crate::runtime::Runtime;
use crate::value::{Outcome, Thenable, Value, Values};

pub use wait::Settled;

pub(crate) use wait::expect_outcome;

/// Unique identifier of a promise node. Never reused within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromiseId(pub u64);

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise({})", self.0)
    }
}

/// Lifecycle state of a promise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Started,
    Resolved,
    Rejected,
    Cancelled,
}

impl Status {
    /// Whether the promise has left Started
    pub fn is_terminal(self) -> bool {
        self != Status::Started
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Started => write!(f, "Started"),
            Status::Resolved => write!(f, "Resolved"),
            Status::Rejected => write!(f, "Rejected"),
            Status::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Callback run once when a node leaves Started
pub(crate) type Reaction = Box<dyn FnOnce(Status, Values)>;

/// Arena entry for one promise
pub(crate) struct Node {
    pub(crate) status: Status,
    pub(crate) values: Values,
    /// Nodes this one consumes
    pub(crate) parents: Vec<PromiseId>,
    /// Nodes that consume this one
    pub(crate) consumers: Vec<PromiseId>,
    pub(crate) cancel_hook: Option<Box<dyn FnOnce()>>,
    /// Pending reactions in attachment order, keyed by the consumer that
    /// registered them
    pub(crate) reactions: Vec<(PromiseId, Reaction)>,
    /// Cleared once anything observes the outcome
    pub(crate) unhandled: bool,
    /// Task driving a suspendable executor
    pub(crate) task: Option<TaskId>,
    /// Liveness of user-visible handles
    pub(crate) handle: Weak<()>,
}

impl Node {
    pub(crate) fn new(handle: Weak<()>, parents: Vec<PromiseId>) -> Self {
        Self {
            status: Status::Started,
            values: Values::new(),
            parents,
            consumers: Vec::new(),
            cancel_hook: None,
            reactions: Vec::new(),
            unhandled: true,
            task: None,
            handle,
        }
    }
}

/// Handle to a cancellable promise
#[derive(Clone)]
pub struct Promise {
    id: PromiseId,
    rt: Runtime,
    _handle: Rc<()>,
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Settles the promise it was handed out for. Clones share the promise.
#[derive(Clone, Debug)]
pub struct Resolver {
    promise: Promise,
}

impl Resolver {
    /// Resolve with `values`; a promise-shaped first value is adopted
    pub fn resolve(&self, values: Values) {
        self.promise.settle_resolve(values);
    }

    pub fn reject(&self, values: Values) {
        self.promise.settle_reject(values);
    }

    /// Whether the promise has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.promise.status() == Status::Cancelled
    }

    /// The promise this resolver settles
    pub fn promise(&self) -> &Promise {
        &self.promise
    }
}

/// Message of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Run user code, turning a panic into a raised fault
pub(crate) fn guard<T>(f: impl FnOnce() -> Outcome<T>) -> Outcome<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(Value::Error(PromiseError::execution(panic_message(&*payload))))
    })
}

/// First value of a payload, or nil
pub(crate) fn first_value(values: Values) -> Value {
    values.into_iter().next().unwrap_or(Value::Nil)
}

impl Promise {
    pub(crate) fn from_parts(id: PromiseId, rt: Runtime, handle: Rc<()>) -> Self {
        Self {
            id,
            rt,
            _handle: handle,
        }
    }

    pub fn id(&self) -> PromiseId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    /// Current status. A node dropped by [`Runtime::shutdown`] reads as
    /// Cancelled.
    pub fn status(&self) -> Status {
        self.rt.with(|inner| {
            inner
                .nodes
                .get(&self.id)
                .map_or(Status::Cancelled, |node| node.status)
        })
    }

    /// Settlement values, once the promise is terminal
    pub fn values(&self) -> Option<Values> {
        self.rt.with(|inner| {
            inner
                .nodes
                .get(&self.id)
                .filter(|node| node.status.is_terminal())
                .map(|node| node.values.clone())
        })
    }

    /// Whether `value` can have continuations attached, natively or
    /// through [`Thenable`]
    pub fn is(value: &Value) -> bool {
        value.is_promise_shaped()
    }

    pub(crate) fn resolver(&self) -> Resolver {
        Resolver {
            promise: self.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a promise and run `executor` synchronously. A raised fault or
    /// panic rejects the promise unless it already settled.
    pub fn new<F>(rt: &Runtime, executor: F) -> Promise
    where
        F: FnOnce(Resolver) -> Outcome<()> + 'static,
    {
        let promise = rt.alloc(&[]);
        promise.run_executor(executor);
        promise
    }

    /// Like [`Promise::new`] but the executor is a future driven by the
    /// runtime. It is polled once immediately and may suspend on other
    /// promises. Cancelling the promise drops the future.
    pub fn new_async<F, Fut>(rt: &Runtime, executor: F) -> Promise
    where
        F: FnOnce(Resolver) -> Fut + 'static,
        Fut: Future<Output = Outcome<()>> + 'static,
    {
        let promise = rt.alloc(&[]);
        let resolver = promise.resolver();
        let settle = promise.clone();
        let body = async move {
            let run = AssertUnwindSafe(async move { executor(resolver).await }).catch_unwind();
            let fault = match run.await {
                Ok(Ok(())) => return,
                Ok(Err(fault)) => fault.into_rejection(),
                Err(payload) => Value::Error(PromiseError::execution(panic_message(&*payload))),
            };
            settle.settle_reject(vec![fault]);
        };
        let task = rt.insert_task(body);
        rt.with_mut(|inner| {
            if let Some(node) = inner.nodes.get_mut(&promise.id) {
                node.task = Some(task);
            }
        });
        rt.poll_task(task);
        promise
    }

    /// Create a promise whose executor runs at the next heartbeat
    pub fn defer<F>(rt: &Runtime, executor: F) -> Promise
    where
        F: FnOnce(Resolver) -> Outcome<()> + 'static,
    {
        let promise = rt.alloc(&[]);
        let pending = promise.clone();
        rt.queue_next_tick(Box::new(move || {
            if pending.status() == Status::Started {
                pending.run_executor(executor);
            }
        }));
        promise
    }

    /// A promise already resolved with `values`
    pub fn resolve(rt: &Runtime, values: Values) -> Promise {
        let promise = rt.alloc(&[]);
        promise.settle_resolve(values);
        promise
    }

    /// A promise already rejected with `values`
    pub fn reject(rt: &Runtime, values: Values) -> Promise {
        let promise = rt.alloc(&[]);
        promise.settle_reject(values);
        promise
    }

    /// Call `f` now; its return resolves the promise, a raised fault rejects
    pub fn attempt<F>(rt: &Runtime, f: F) -> Promise
    where
        F: FnOnce() -> Outcome + 'static,
    {
        Promise::new(rt, move |resolver| {
            resolver.resolve(f()?);
            Ok(())
        })
    }

    /// Wrap `f` so every call returns a promise of its outcome
    pub fn promisify<F>(rt: &Runtime, f: F) -> impl Fn(Values) -> Promise
    where
        F: Fn(Values) -> Outcome + 'static,
    {
        let rt = rt.clone();
        let f = Rc::new(f);
        move |args| {
            let f = f.clone();
            Promise::attempt(&rt, move || f(args))
        }
    }

    /// A promise for `value`: native promises are returned as-is, anything
    /// else is resolved into a fresh promise (adopting thenables)
    pub fn from_value(rt: &Runtime, value: Value) -> Promise {
        match value {
            Value::Promise(promise) => promise,
            other => Promise::resolve(rt, vec![other]),
        }
    }

    fn run_executor<F>(&self, executor: F)
    where
        F: FnOnce(Resolver) -> Outcome<()>,
    {
        let resolver = self.resolver();
        if let Err(fault) = guard(move || executor(resolver)) {
            self.settle_reject(vec![fault.into_rejection()]);
        }
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Resolve, adopting a promise-shaped first value
    pub(crate) fn settle_resolve(&self, values: Values) {
        if self.status() != Status::Started {
            return;
        }
        match values.first() {
            Some(Value::Promise(inner)) => {
                self.warn_discarded(&values);
                let inner = inner.clone();
                self.adopt(inner);
            }
            Some(Value::Thenable(foreign)) => {
                self.warn_discarded(&values);
                let foreign = foreign.clone();
                self.adopt_foreign(foreign);
            }
            _ => self.transition(Status::Resolved, values),
        }
    }

    pub(crate) fn settle_reject(&self, values: Values) {
        self.transition(Status::Rejected, values);
    }

    fn warn_discarded(&self, values: &Values) {
        if values.len() > 1 {
            warn!(
                promise = %self.id,
                discarded = values.len() - 1,
                "resolved with a promise and extra values; the extra values are discarded"
            );
        }
    }

    /// Follow another native promise, linking it for cancellation
    fn adopt(&self, inner: Promise) {
        if inner.id == self.id {
            self.settle_reject(vec![Value::Error(PromiseError::execution(
                "A Promise cannot be resolved with itself",
            ))]);
            return;
        }
        let on_resolve = self.clone();
        let on_reject = self.clone();
        let link = inner.chain(
            Some(Box::new(move |values| {
                on_resolve.settle_resolve(values);
                Ok(Values::new())
            })),
            Some(Box::new(move |values| {
                on_reject.settle_reject(chained_rejection(values));
                Ok(Values::new())
            })),
        );
        match link.status() {
            Status::Cancelled => self.cancel(),
            Status::Started => self.rt.link(link.id, self.id),
            Status::Resolved | Status::Rejected => {}
        }
    }

    /// Follow a foreign thenable. There is no cancellation link.
    fn adopt_foreign(&self, foreign: Rc<dyn Thenable>) {
        let on_resolve = self.clone();
        let on_reject = self.clone();
        foreign.then(
            Box::new(move |values| on_resolve.settle_resolve(values)),
            Box::new(move |values| on_reject.settle_reject(values)),
        );
    }

    /// Move to a terminal status and run reactions
    pub(crate) fn transition(&self, status: Status, values: Values) {
        let settled = self.rt.with_mut(|inner| {
            let node = inner.nodes.get_mut(&self.id)?;
            if node.status != Status::Started {
                return None;
            }
            node.status = status;
            node.values = values.clone();
            let hook = node.cancel_hook.take();
            let reactions = std::mem::take(&mut node.reactions);
            let unhandled = status == Status::Rejected && node.unhandled;
            inner.stats.promises_settled += 1;
            Some((hook, reactions, unhandled))
        });
        let Some((hook, reactions, unhandled)) = settled else {
            return;
        };
        drop(hook);
        trace!(promise = %self.id, %status, "settled");

        if unhandled {
            let pending = self.clone();
            self.rt.queue_tick_end(Box::new(move || pending.report_if_unhandled()));
        }
        for (_, reaction) in reactions {
            reaction(status, values.clone());
        }
    }

    fn report_if_unhandled(&self) {
        let unhandled = self.rt.with(|inner| {
            inner
                .nodes
                .get(&self.id)
                .filter(|node| node.unhandled)
                .map(|node| node.values.clone())
        });
        if let Some(values) = unhandled {
            self.rt.report_unhandled(self.id, values);
        }
    }

    /// Run `reaction` on behalf of `consumer` when this node settles. On an
    /// already terminal node it runs at the next microtask drain. The
    /// reaction is dropped if `consumer` is cancelled first.
    pub(crate) fn react(&self, consumer: PromiseId, reaction: Reaction) {
        let settled = self.rt.with_mut(|inner| match inner.nodes.get_mut(&self.id) {
            Some(node) if node.status == Status::Started => {
                node.reactions.push((consumer, reaction));
                None
            }
            Some(node) => Some((node.status, node.values.clone(), reaction)),
            None => Some((Status::Cancelled, Values::new(), reaction)),
        });
        if let Some((status, values, reaction)) = settled {
            self.rt
                .queue_microtask(Box::new(move || reaction(status, values)));
        }
    }

    /// Record that something observes this promise's outcome
    pub(crate) fn mark_handled(&self) {
        self.rt.with_mut(|inner| {
            if let Some(node) = inner.nodes.get_mut(&self.id) {
                node.unhandled = false;
            }
        });
    }

    /// Allocate a node that consumes this one
    pub(crate) fn derive(&self) -> Promise {
        self.rt.alloc(&[self.id])
    }

    /// Settle with exactly `status` and `values`, without adoption
    pub(crate) fn follow(&self, status: Status, values: Values) {
        match status {
            Status::Resolved | Status::Rejected => self.transition(status, values),
            Status::Cancelled => self.cancel(),
            Status::Started => {}
        }
    }

    /// Attach an internal observer. The returned link node consumes this
    /// promise, resolves with no values after `observer` runs, and is
    /// cancelled when this promise is. Cancelling the link releases this
    /// promise's claim on its parents.
    pub(crate) fn watch<F>(&self, observer: F) -> Promise
    where
        F: FnOnce(Status, Values) + 'static,
    {
        self.mark_handled();
        let link = self.derive();
        let target = link.clone();
        self.react(link.id, Box::new(move |status, values| {
            if target.status() != Status::Started {
                return;
            }
            observer(status, values);
            match status {
                Status::Cancelled => target.cancel(),
                _ => target.transition(Status::Resolved, Values::new()),
            }
        }));
        link
    }
}

/// Extend an `ExecutionError` coming through an adoption boundary
fn chained_rejection(mut values: Values) -> Values {
    if let Some(Value::Error(err)) = values.first_mut() {
        if err.is_kind(ErrorKind::ExecutionError) {
            *err = err.extend("This Promise was chained to a Promise that errored.");
        }
    }
    values
}

impl Thenable for Promise {
    fn then(&self, on_resolve: Box<dyn FnOnce(Values)>, on_reject: Box<dyn FnOnce(Values)>) {
        self.and_then_or(
            move |values| {
                on_resolve(values);
                Ok(Values::new())
            },
            move |values| {
                on_reject(values);
                Ok(Values::new())
            },
        );
    }
}
