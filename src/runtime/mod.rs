//! Runtime environment for coop-promise
//!
//! A [`Runtime`] owns every promise node, the event loop, the local task set
//! and the unhandled-rejection registry. It is a cheap, clonable handle to
//! single-threaded shared state; every [`Promise`] carries one.
//!
//! Nothing here runs on its own. The host drives the runtime by calling
//! [`Runtime::tick`] once per heartbeat, [`Runtime::drain`] to flush
//! microtasks, or [`Runtime::block_on`] to run until one promise settles.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::config::RuntimeConfig;
use crate::diagnostics::{Diagnostics, HookId, UnhandledRejection};
use crate::error::{Error, Result};
use crate::event_loop::task::LocalTasks;
use crate::event_loop::{
    Clock, EventLoop, EventLoopStats, Job, ManualClock, SystemClock, TaskId, TimerCallback, TimerId,
};
use crate::promise::{Node, Promise, PromiseId, Status};
use crate::value::Values;

/// Counters describing runtime activity
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub promises_created: u64,
    pub promises_settled: u64,
    pub promises_cancelled: u64,
    /// Microtasks and task polls run by `drain`
    pub microtasks_processed: u64,
    /// Largest single drain pass
    pub max_microtasks_per_drain: u64,
    pub tasks_polled: u64,
    pub unhandled_rejections: u64,
    /// Terminal nodes reclaimed by the sweep
    pub nodes_reclaimed: u64,
    pub event_loop: EventLoopStats,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    clock: Rc<dyn Clock>,
    pub(crate) nodes: HashMap<PromiseId, Node>,
    next_promise_id: u64,
    pub(crate) event_loop: EventLoop,
    tasks: LocalTasks,
    diagnostics: Diagnostics,
    pub(crate) stats: RuntimeStats,
}

/// Handle to a cooperative promise runtime
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RefCell<RuntimeInner>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Runtime")
            .field("live_promises", &inner.nodes.len())
            .field("tick", &inner.event_loop.current_tick())
            .finish()
    }
}

/// Builder for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    clock: Option<Rc<dyn Clock>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Rc::new(SystemClock::new()));
        Ok(Runtime::from_parts(self.config, clock))
    }
}

impl Runtime {
    /// Create a runtime on the system clock with default configuration
    pub fn new() -> Self {
        Self::from_parts(RuntimeConfig::default(), Rc::new(SystemClock::new()))
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Create a runtime driven by virtual time
    pub fn with_manual_clock() -> (Self, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new());
        let runtime = Self::from_parts(RuntimeConfig::default(), clock.clone());
        (runtime, clock)
    }

    fn from_parts(config: RuntimeConfig, clock: Rc<dyn Clock>) -> Self {
        Runtime {
            inner: Rc::new(RefCell::new(RuntimeInner {
                config,
                clock,
                nodes: HashMap::default(),
                next_promise_id: 0,
                event_loop: EventLoop::new(),
                tasks: LocalTasks::default(),
                diagnostics: Diagnostics::default(),
                stats: RuntimeStats::default(),
            })),
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&RuntimeInner) -> R) -> R {
        f(&self.inner.borrow())
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut RuntimeInner) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    pub fn config(&self) -> RuntimeConfig {
        self.with(|inner| inner.config.clone())
    }

    /// Current clock reading
    pub fn now(&self) -> Duration {
        let clock = self.with(|inner| inner.clock.clone());
        clock.now()
    }

    /// Heartbeats run so far
    pub fn current_tick(&self) -> u64 {
        self.with(|inner| inner.event_loop.current_tick())
    }

    // ------------------------------------------------------------------
    // Node arena
    // ------------------------------------------------------------------

    /// Allocate a Started node, linked as a consumer of `parents`
    pub(crate) fn alloc(&self, parents: &[PromiseId]) -> Promise {
        let token = Rc::new(());
        let id = self.with_mut(|inner| {
            inner.next_promise_id += 1;
            let id = PromiseId(inner.next_promise_id);
            inner.nodes.insert(id, Node::new(Rc::downgrade(&token), parents.to_vec()));
            for parent in parents {
                if let Some(node) = inner.nodes.get_mut(parent) {
                    node.consumers.push(id);
                }
            }
            inner.stats.promises_created += 1;
            id
        });
        trace!(promise = %id, "created");
        Promise::from_parts(id, self.clone(), token)
    }

    /// A handle to an existing node, if it has not been reclaimed
    pub(crate) fn handle(&self, id: PromiseId) -> Option<Promise> {
        let token = self.with_mut(|inner| {
            let node = inner.nodes.get_mut(&id)?;
            Some(match node.handle.upgrade() {
                Some(token) => token,
                None => {
                    let token = Rc::new(());
                    node.handle = Rc::downgrade(&token);
                    token
                }
            })
        })?;
        Some(Promise::from_parts(id, self.clone(), token))
    }

    /// Record `child` as a consumer of `parent`
    pub(crate) fn link(&self, parent: PromiseId, child: PromiseId) {
        self.with_mut(|inner| {
            if let Some(node) = inner.nodes.get_mut(&parent) {
                node.consumers.push(child);
            }
            if let Some(node) = inner.nodes.get_mut(&child) {
                node.parents.push(parent);
            }
        });
    }

    /// Nodes currently held by the arena
    pub fn live_promises(&self) -> usize {
        self.with(|inner| inner.nodes.len())
    }

    /// Reclaim terminal nodes that no handle can reach. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let removed: Vec<Node> = self.with_mut(|inner| {
            let dead: Vec<PromiseId> = inner
                .nodes
                .iter()
                .filter(|(_, node)| node.status.is_terminal() && node.handle.strong_count() == 0)
                .map(|(id, _)| *id)
                .collect();
            let removed: Vec<Node> = dead.iter().filter_map(|id| inner.nodes.remove(id)).collect();
            inner.stats.nodes_reclaimed += removed.len() as u64;
            removed
        });
        removed.len()
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    pub(crate) fn queue_microtask(&self, job: Job) {
        self.with_mut(|inner| inner.event_loop.enqueue_microtask(job));
    }

    pub(crate) fn queue_next_tick(&self, job: Job) {
        self.with_mut(|inner| inner.event_loop.queue_next_tick(job));
    }

    pub(crate) fn queue_tick_end(&self, job: Job) {
        self.with_mut(|inner| inner.event_loop.queue_tick_end(job));
    }

    pub(crate) fn schedule_after(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let now = self.now();
        self.with_mut(|inner| inner.event_loop.schedule_timer(now, delay, callback))
    }

    /// Remove a pending timer; returns whether it was still pending
    pub(crate) fn cancel_timer(&self, id: TimerId) -> bool {
        let callback = self.with_mut(|inner| inner.event_loop.cancel_timer(id));
        callback.is_some()
    }

    pub fn pending_timers(&self) -> usize {
        self.with(|inner| inner.event_loop.pending_timers())
    }

    /// Spawn a local task and poll it once right away
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.insert_task(future);
        self.poll_task(id);
        id
    }

    pub(crate) fn insert_task<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.with_mut(|inner| inner.tasks.insert(future.boxed_local()))
    }

    pub(crate) fn poll_task(&self, id: TaskId) {
        let Some((mut task, waker)) = self.with_mut(|inner| inner.tasks.begin_poll(id)) else {
            return;
        };
        let mut cx = Context::from_waker(&waker);
        let finished = match catch_unwind(AssertUnwindSafe(|| task.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(())) => true,
            Ok(Poll::Pending) => false,
            Err(_) => {
                error!(task = %id, "task panicked");
                true
            }
        };
        let pending = if finished { None } else { Some(task) };
        let aborted = self.with_mut(|inner| {
            inner.stats.tasks_polled += 1;
            inner.tasks.end_poll(id, pending)
        });
        drop(aborted);
    }

    pub(crate) fn abort_task(&self, id: TaskId) {
        let task = self.with_mut(|inner| inner.tasks.abort(id));
        drop(task);
    }

    /// Tasks spawned and not yet finished
    pub fn pending_tasks(&self) -> usize {
        self.with(|inner| inner.tasks.len())
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Run microtasks and woken tasks until none remain or the budget is
    /// spent. Returns how many were run.
    pub fn drain(&self) -> usize {
        let budget = self.with(|inner| inner.config.microtask_budget);
        let mut processed = 0;
        while processed < budget {
            if let Some(job) = self.with_mut(|inner| inner.event_loop.dequeue_microtask()) {
                job();
                processed += 1;
                continue;
            }
            if let Some(task) = self.with_mut(|inner| inner.tasks.next_ready()) {
                self.poll_task(task);
                processed += 1;
                continue;
            }
            break;
        }
        if processed >= budget {
            debug!(budget, "microtask budget exhausted, yielding");
        }
        self.with_mut(|inner| {
            inner.stats.microtasks_processed += processed as u64;
            inner.stats.max_microtasks_per_drain =
                inner.stats.max_microtasks_per_drain.max(processed as u64);
        });
        processed
    }

    /// One heartbeat: flush microtasks, run the jobs deferred to this
    /// heartbeat, fire due timers, flush again, run end-of-heartbeat checks,
    /// then reclaim dead nodes.
    pub fn tick(&self) {
        self.drain();
        let jobs = self.with_mut(|inner| inner.event_loop.begin_tick());
        for job in jobs {
            job();
        }
        let now = self.now();
        while let Some((elapsed, callback)) = self.with_mut(|inner| inner.event_loop.pop_due_timer(now)) {
            callback(elapsed);
        }
        self.drain();
        let checks = self.with_mut(|inner| inner.event_loop.end_tick());
        for check in checks {
            check();
        }
        self.drain();
        self.sweep();
    }

    /// Run heartbeats until `promise` leaves Started, sleeping on the clock
    /// between timers. Fails with [`Error::Stalled`] when nothing is left
    /// that could settle it.
    pub fn block_on(&self, promise: &Promise) -> Result<(Status, Values)> {
        promise.mark_handled();
        loop {
            self.drain();
            let status = promise.status();
            if status.is_terminal() {
                return Ok((status, promise.values().unwrap_or_default()));
            }
            let (busy, deadline, clock) = self.with(|inner| {
                (
                    inner.event_loop.has_pending_microtasks()
                        || inner.event_loop.has_next_tick_jobs()
                        || inner.tasks.has_ready(),
                    inner.event_loop.next_deadline(),
                    inner.clock.clone(),
                )
            });
            if !busy {
                match deadline {
                    Some(deadline) => clock.sleep_until(deadline),
                    None => return Err(Error::Stalled(promise.id())),
                }
            }
            self.tick();
        }
    }

    /// Block until `promise` settles and return its resolution values.
    /// Rejections and cancellation become errors.
    pub fn expect(&self, promise: &Promise) -> Result<Values> {
        let (status, values) = self.block_on(promise)?;
        crate::promise::expect_outcome(status, values)
    }

    // ------------------------------------------------------------------
    // Unhandled rejections
    // ------------------------------------------------------------------

    /// Register a callback run for every unhandled rejection
    pub fn on_unhandled_rejection<F>(&self, hook: F) -> HookId
    where
        F: Fn(&UnhandledRejection) + 'static,
    {
        self.with_mut(|inner| inner.diagnostics.add_hook(Rc::new(hook)))
    }

    pub fn remove_unhandled_rejection_hook(&self, id: HookId) -> bool {
        self.with_mut(|inner| inner.diagnostics.remove_hook(id))
    }

    /// Take every report made so far
    pub fn drain_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        self.with_mut(|inner| inner.diagnostics.drain())
    }

    pub(crate) fn report_unhandled(&self, promise: PromiseId, values: Values) {
        let (hooks, rejection, warn_enabled) = self.with_mut(|inner| {
            let rejection = UnhandledRejection {
                promise,
                values,
                tick: inner.event_loop.current_tick(),
            };
            inner.stats.unhandled_rejections += 1;
            let hooks = inner.diagnostics.record(rejection.clone());
            (hooks, rejection, inner.config.warn_unhandled_rejections)
        });
        if warn_enabled {
            warn!(
                promise = %promise,
                values = %crate::value::format_values(&rejection.values),
                "unhandled promise rejection"
            );
        }
        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(&rejection))).is_err() {
                error!(promise = %promise, "unhandled rejection hook panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn stats(&self) -> RuntimeStats {
        self.with(|inner| {
            let mut stats = inner.stats.clone();
            stats.event_loop = inner.event_loop.stats();
            stats
        })
    }

    pub fn reset_stats(&self) {
        self.with_mut(|inner| {
            inner.stats = RuntimeStats::default();
            inner.event_loop.reset_stats();
        });
    }

    /// Drop every node, queued job, timer, task and hook. Handles that
    /// outlive this see their promises as Cancelled.
    pub fn shutdown(&self) {
        let (nodes, queued, tasks, hooks) = self.with_mut(|inner| {
            let nodes: Vec<Node> = inner.nodes.drain().map(|(_, node)| node).collect();
            let queued = inner.event_loop.clear();
            let tasks = inner.tasks.clear();
            let hooks = inner.diagnostics.clear();
            (nodes, queued, tasks, hooks)
        });
        debug!(nodes = nodes.len(), tasks = tasks.len(), "runtime shut down");
        drop(tasks);
        drop(queued);
        drop(nodes);
        drop(hooks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values;
    use std::cell::Cell;

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = RuntimeConfig {
            microtask_budget: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(Runtime::builder().config(config).build(), Err(Error::Config(_))));
    }

    #[test]
    fn test_tick_fires_due_timers() {
        let (rt, clock) = Runtime::with_manual_clock();
        let fired = Rc::new(Cell::new(None));
        let seen = fired.clone();
        let _ = rt.schedule_after(Duration::from_secs(1), Box::new(move |elapsed| seen.set(Some(elapsed))));

        rt.tick();
        assert_eq!(fired.get(), None);

        clock.advance(Duration::from_secs(1));
        rt.tick();
        assert_eq!(fired.get(), Some(Duration::from_secs(1)));
        assert_eq!(rt.pending_timers(), 0);
    }

    #[test]
    fn test_drain_respects_budget() {
        let rt = Runtime::builder()
            .config(RuntimeConfig {
                microtask_budget: 2,
                ..RuntimeConfig::default()
            })
            .build()
            .unwrap();
        for _ in 0..5 {
            rt.queue_microtask(Box::new(|| {}));
        }
        assert_eq!(rt.drain(), 2);
        assert_eq!(rt.drain(), 2);
        assert_eq!(rt.drain(), 1);
        assert_eq!(rt.stats().max_microtasks_per_drain, 2);
    }

    #[test]
    fn test_spawn_polls_immediately() {
        let rt = Runtime::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        rt.spawn(async move { flag.set(true) });
        assert!(ran.get());
        assert_eq!(rt.pending_tasks(), 0);
    }

    #[test]
    fn test_block_on_stalls_without_work() {
        let rt = Runtime::new();
        let p = Promise::new(&rt, |_resolver| Ok(()));
        assert!(matches!(rt.block_on(&p), Err(Error::Stalled(id)) if id == p.id()));
    }

    #[test]
    fn test_sweep_reclaims_unreachable_terminal_nodes() {
        let rt = Runtime::new();
        let p = Promise::resolve(&rt, values![1]);
        assert_eq!(rt.live_promises(), 1);
        assert_eq!(rt.sweep(), 0);
        drop(p);
        assert_eq!(rt.sweep(), 1);
        assert_eq!(rt.live_promises(), 0);
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let (rt, _clock) = Runtime::with_manual_clock();
        let p = Promise::delay(&rt, 5.0);
        rt.shutdown();
        assert_eq!(rt.live_promises(), 0);
        assert_eq!(rt.pending_timers(), 0);
        assert_eq!(p.status(), Status::Cancelled);
    }
}
