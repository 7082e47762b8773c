//! Event Loop Implementation
//!
//! The host side of the promise runtime: a microtask queue for handlers that
//! must run "at the next scheduling opportunity", a next-tick job list
//! consumed at each heartbeat, and a deadline-ordered timer set backing
//! `delay` and `timeout`.
//!
//! The loop only stores work. Running it is the job of
//! [`Runtime`](crate::Runtime), which pops one job at a time so that no
//! borrow is held while user code executes.

pub mod clock;
pub mod task;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use clock::{Clock, ManualClock, SystemClock};
pub use task::TaskId;

/// A unit of deferred work
pub(crate) type Job = Box<dyn FnOnce()>;

/// Timer callback, invoked with the time actually elapsed since scheduling
pub(crate) type TimerCallback = Box<dyn FnOnce(Duration)>;

/// Identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// A pending one-shot timer
pub(crate) struct Timer {
    /// Clock reading when the timer was scheduled
    started_at: Duration,
    callback: TimerCallback,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    /// Total number of heartbeats
    pub total_ticks: u64,
    /// Total microtasks enqueued
    pub total_microtasks: u64,
    /// Total next-tick jobs run
    pub total_next_tick_jobs: u64,
    /// Timers scheduled
    pub timers_scheduled: u64,
    /// Timers that fired
    pub timers_fired: u64,
    /// Timers removed before firing
    pub timers_cancelled: u64,
}

/// The event loop manages task queues and timer ordering
pub struct EventLoop {
    /// Microtask queue (runs before the next heartbeat)
    microtask_queue: VecDeque<Job>,
    /// Jobs waiting for the next heartbeat
    next_tick: Vec<Job>,
    /// Jobs run once the current heartbeat has finished its work
    tick_end: Vec<Job>,
    /// Pending timers ordered by deadline, ties broken by creation order
    timers: BTreeMap<(Duration, TimerId), Timer>,
    /// Deadline of every pending timer, for removal by id
    deadlines: HashMap<TimerId, Duration>,
    /// Next timer ID
    next_timer_id: u64,
    /// Heartbeats seen so far
    tick: u64,
    stats: EventLoopStats,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> Self {
        Self {
            microtask_queue: VecDeque::new(),
            next_tick: Vec::new(),
            tick_end: Vec::new(),
            timers: BTreeMap::new(),
            deadlines: HashMap::default(),
            next_timer_id: 1,
            tick: 0,
            stats: EventLoopStats::default(),
        }
    }

    /// Heartbeats seen so far
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Enqueue a microtask
    pub(crate) fn enqueue_microtask(&mut self, job: Job) {
        self.stats.total_microtasks += 1;
        self.microtask_queue.push_back(job);
    }

    /// Dequeue the next microtask
    pub(crate) fn dequeue_microtask(&mut self) -> Option<Job> {
        self.microtask_queue.pop_front()
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.microtask_queue.is_empty()
    }

    /// Defer a job to the next heartbeat
    pub(crate) fn queue_next_tick(&mut self, job: Job) {
        self.next_tick.push(job);
    }

    pub fn has_next_tick_jobs(&self) -> bool {
        !self.next_tick.is_empty()
    }

    /// Defer a job until the end of the heartbeat in progress, or of the
    /// next one if none is running
    pub(crate) fn queue_tick_end(&mut self, job: Job) {
        self.tick_end.push(job);
    }

    pub fn has_tick_end_jobs(&self) -> bool {
        !self.tick_end.is_empty()
    }

    /// Hand back the jobs queued for the end of this heartbeat. Jobs queued
    /// while these run wait for the end of the following heartbeat.
    pub(crate) fn end_tick(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.tick_end)
    }

    /// Start a heartbeat and hand back the jobs queued for it. Jobs queued
    /// while these run belong to the following heartbeat.
    pub(crate) fn begin_tick(&mut self) -> Vec<Job> {
        self.tick += 1;
        self.stats.total_ticks += 1;
        let jobs = std::mem::take(&mut self.next_tick);
        self.stats.total_next_tick_jobs += jobs.len() as u64;
        jobs
    }

    /// Schedule a one-shot timer `delay` after `now`
    pub(crate) fn schedule_timer(
        &mut self,
        now: Duration,
        delay: Duration,
        callback: TimerCallback,
    ) -> TimerId {
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;

        let fire_at = now.saturating_add(delay);
        self.timers.insert(
            (fire_at, id),
            Timer {
                started_at: now,
                callback,
            },
        );
        self.deadlines.insert(id, fire_at);
        self.stats.timers_scheduled += 1;
        debug!(timer = %id, ?fire_at, "timer scheduled");
        id
    }

    /// Remove a timer before it fires. The entry is taken out of the
    /// pending set immediately; the callback is returned so the caller can
    /// drop it outside any runtime borrow.
    pub(crate) fn cancel_timer(&mut self, id: TimerId) -> Option<TimerCallback> {
        let fire_at = self.deadlines.remove(&id)?;
        let timer = self.timers.remove(&(fire_at, id))?;
        self.stats.timers_cancelled += 1;
        debug!(timer = %id, "timer cancelled");
        Some(timer.callback)
    }

    /// Pop the earliest timer whose deadline has passed, with the time
    /// elapsed since it was scheduled
    pub(crate) fn pop_due_timer(&mut self, now: Duration) -> Option<(Duration, TimerCallback)> {
        let key = *self.timers.keys().next()?;
        if key.0 > now {
            return None;
        }
        let timer = self.timers.remove(&key)?;
        self.deadlines.remove(&key.1);
        self.stats.timers_fired += 1;
        Some((now.saturating_sub(timer.started_at), timer.callback))
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.keys().next().map(|(fire_at, _)| *fire_at)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks()
            || self.has_next_tick_jobs()
            || self.has_tick_end_jobs()
            || !self.timers.is_empty()
    }

    /// Get a snapshot of the current event loop statistics
    pub fn stats(&self) -> EventLoopStats {
        self.stats.clone()
    }

    pub fn reset_stats(&mut self) {
        self.stats = EventLoopStats::default();
    }

    /// Remove all pending work. Returned jobs and timers must be dropped
    /// by the caller outside any runtime borrow.
    pub(crate) fn clear(&mut self) -> (Vec<Job>, Vec<TimerCallback>) {
        let mut jobs: Vec<Job> = self.microtask_queue.drain(..).collect();
        jobs.append(&mut self.next_tick);
        jobs.append(&mut self.tick_end);
        self.deadlines.clear();
        let timers = std::mem::take(&mut self.timers)
            .into_values()
            .map(|timer| timer.callback)
            .collect();
        (jobs, timers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_event_loop_creation() {
        let el = EventLoop::new();
        assert_eq!(el.current_tick(), 0);
        assert!(!el.has_pending_work());
    }

    #[test]
    fn test_microtask_queue_is_fifo() {
        let mut el = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            el.enqueue_microtask(Box::new(move || log.borrow_mut().push(i)));
        }
        while let Some(job) = el.dequeue_microtask() {
            job();
        }
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(el.stats().total_microtasks, 3);
    }

    #[test]
    fn test_next_tick_jobs_belong_to_one_tick() {
        let mut el = EventLoop::new();
        el.queue_next_tick(Box::new(|| {}));
        assert!(el.has_next_tick_jobs());

        let jobs = el.begin_tick();
        assert_eq!(jobs.len(), 1);
        assert_eq!(el.current_tick(), 1);
        assert!(!el.has_next_tick_jobs());
    }

    #[test]
    fn test_tick_end_jobs_are_separate_from_next_tick() {
        let mut el = EventLoop::new();
        el.queue_tick_end(Box::new(|| {}));
        assert!(el.has_pending_work());
        assert!(el.begin_tick().is_empty());
        assert_eq!(el.end_tick().len(), 1);
        assert!(!el.has_tick_end_jobs());
    }

    #[test]
    fn test_huge_delay_saturates_deadline() {
        let mut el = EventLoop::new();
        el.schedule_timer(secs(5), Duration::MAX, Box::new(|_| {}));
        assert_eq!(el.next_deadline(), Some(Duration::MAX));
        assert!(el.pop_due_timer(secs(u64::MAX / 2)).is_none());
    }

    #[test]
    fn test_timer_not_ready_before_deadline() {
        let mut el = EventLoop::new();
        el.schedule_timer(secs(0), secs(2), Box::new(|_| {}));

        assert!(el.pop_due_timer(secs(1)).is_none());
        let (elapsed, _) = el.pop_due_timer(secs(3)).expect("timer is due");
        assert_eq!(elapsed, secs(3));
        assert_eq!(el.pending_timers(), 0);
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut el = EventLoop::new();
        let late = el.schedule_timer(secs(0), secs(10), Box::new(|_| {}));
        el.schedule_timer(secs(0), secs(1), Box::new(|_| {}));

        assert_eq!(el.next_deadline(), Some(secs(1)));
        let (elapsed, _) = el.pop_due_timer(secs(1)).unwrap();
        assert_eq!(elapsed, secs(1));
        assert!(el.pop_due_timer(secs(1)).is_none());
        assert!(el.cancel_timer(late).is_some());
    }

    #[test]
    fn test_timer_cancellation_removes_entry() {
        let mut el = EventLoop::new();
        let id = el.schedule_timer(secs(0), secs(1), Box::new(|_| {}));
        assert_eq!(el.pending_timers(), 1);

        assert!(el.cancel_timer(id).is_some());
        assert_eq!(el.pending_timers(), 0);
        assert!(el.cancel_timer(id).is_none());
        assert!(el.pop_due_timer(secs(5)).is_none());
        assert_eq!(el.stats().timers_cancelled, 1);
    }

    #[test]
    fn test_clear_hands_back_everything() {
        let mut el = EventLoop::new();
        el.enqueue_microtask(Box::new(|| {}));
        el.queue_next_tick(Box::new(|| {}));
        el.schedule_timer(secs(0), secs(1), Box::new(|_| {}));

        let (jobs, timers) = el.clear();
        assert_eq!(jobs.len(), 2);
        assert_eq!(timers.len(), 1);
        assert!(!el.has_pending_work());
    }
}
