//! Local task set for suspendable executors
//!
//! Futures live here between polls. A waker pushes its task id onto a shared
//! ready queue; the runtime pops ids and polls the matching future with no
//! runtime borrow held. While a future is being polled it is out of the
//! map, so a wake that arrives during its own poll is remembered and the
//! task is re-queued when the poll ends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::task::Waker;

use futures::future::LocalBoxFuture;
use futures::task::{waker, ArcWake};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifier of a spawned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

pub(crate) type LocalTask = LocalBoxFuture<'static, ()>;

type ReadyQueue = Arc<Mutex<VecDeque<TaskId>>>;

struct TaskWaker {
    id: TaskId,
    ready: ReadyQueue,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Ok(mut ready) = arc_self.ready.lock() {
            ready.push_back(arc_self.id);
        }
    }
}

#[derive(Default)]
pub(crate) struct LocalTasks {
    tasks: HashMap<TaskId, LocalTask>,
    ready: ReadyQueue,
    /// Tasks currently out of the map being polled
    polling: HashSet<TaskId>,
    /// Tasks woken during their own poll
    rewoken: HashSet<TaskId>,
    /// Tasks aborted during their own poll
    aborted: HashSet<TaskId>,
    next_id: u64,
}

impl LocalTasks {
    /// Store a future without polling it
    pub(crate) fn insert(&mut self, task: LocalTask) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.insert(id, task);
        id
    }

    /// Next task whose waker fired
    pub(crate) fn next_ready(&mut self) -> Option<TaskId> {
        self.ready.lock().ok()?.pop_front()
    }

    pub(crate) fn has_ready(&self) -> bool {
        self.ready.lock().map(|r| !r.is_empty()).unwrap_or(false)
    }

    /// Take a task out for polling, along with its waker. Returns `None` if
    /// the task finished, was aborted, or is already being polled.
    pub(crate) fn begin_poll(&mut self, id: TaskId) -> Option<(LocalTask, Waker)> {
        if self.polling.contains(&id) {
            self.rewoken.insert(id);
            return None;
        }
        let task = self.tasks.remove(&id)?;
        self.polling.insert(id);
        let waker = waker(Arc::new(TaskWaker {
            id,
            ready: self.ready.clone(),
        }));
        Some((task, waker))
    }

    /// Put a pending task back. An aborted task is handed back to the
    /// caller to drop.
    pub(crate) fn end_poll(&mut self, id: TaskId, task: Option<LocalTask>) -> Option<LocalTask> {
        self.polling.remove(&id);
        let rewoken = self.rewoken.remove(&id);
        if self.aborted.remove(&id) {
            return task;
        }
        let task = task?;
        self.tasks.insert(id, task);
        if rewoken {
            if let Ok(mut ready) = self.ready.lock() {
                ready.push_back(id);
            }
        }
        None
    }

    /// Remove a task so it is never polled again. The future is handed
    /// back so it can be dropped outside any runtime borrow.
    pub(crate) fn abort(&mut self, id: TaskId) -> Option<LocalTask> {
        if self.polling.contains(&id) {
            self.aborted.insert(id);
            return None;
        }
        let task = self.tasks.remove(&id);
        if task.is_some() {
            debug!(task = %id, "task aborted");
        }
        task
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len() + self.polling.len()
    }

    pub(crate) fn clear(&mut self) -> Vec<LocalTask> {
        if let Ok(mut ready) = self.ready.lock() {
            ready.clear();
        }
        self.aborted.extend(self.polling.iter().copied());
        self.rewoken.clear();
        self.tasks.drain().map(|(_, task)| task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_wake_queues_task() {
        let mut tasks = LocalTasks::default();
        let id = tasks.insert(async {}.boxed_local());

        let (task, waker) = tasks.begin_poll(id).expect("task is stored");
        waker.wake_by_ref();
        assert!(tasks.end_poll(id, Some(task)).is_none());

        assert_eq!(tasks.next_ready(), Some(id));
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_rewake_during_poll() {
        let mut tasks = LocalTasks::default();
        let id = tasks.insert(async {}.boxed_local());

        let (task, _waker) = tasks.begin_poll(id).unwrap();
        assert!(tasks.begin_poll(id).is_none());
        tasks.end_poll(id, Some(task));
        assert_eq!(tasks.next_ready(), Some(id));
    }

    #[test]
    fn test_abort_during_poll_hands_task_back() {
        let mut tasks = LocalTasks::default();
        let id = tasks.insert(async {}.boxed_local());

        let (task, _waker) = tasks.begin_poll(id).unwrap();
        assert!(tasks.abort(id).is_none());
        assert!(tasks.end_poll(id, Some(task)).is_some());
        assert_eq!(tasks.len(), 0);
    }

    #[test]
    fn test_abort_idle_task() {
        let mut tasks = LocalTasks::default();
        let id = tasks.insert(async {}.boxed_local());
        assert!(tasks.abort(id).is_some());
        assert!(tasks.begin_poll(id).is_none());
    }
}
