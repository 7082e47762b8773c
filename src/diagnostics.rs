//! Unhandled rejection tracking
//!
//! A rejected promise that nobody observes by the next heartbeat is
//! reported exactly once: logged, recorded for later inspection, and passed
//! to every registered hook.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::promise::PromiseId;
use crate::value::Values;

/// A rejection nobody observed
#[derive(Debug, Clone, PartialEq)]
pub struct UnhandledRejection {
    /// The promise that rejected
    pub promise: PromiseId,
    /// Its rejection values
    pub values: Values,
    /// Heartbeat during which the report was made
    pub tick: u64,
}

/// Registration handle for an unhandled rejection hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HookId(pub u64);

pub(crate) type RejectionHook = Rc<dyn Fn(&UnhandledRejection)>;

#[derive(Default)]
pub(crate) struct Diagnostics {
    hooks: Vec<(HookId, RejectionHook)>,
    reported: Vec<UnhandledRejection>,
    next_hook: u64,
}

impl Diagnostics {
    pub(crate) fn add_hook(&mut self, hook: RejectionHook) -> HookId {
        self.next_hook += 1;
        let id = HookId(self.next_hook);
        self.hooks.push((id, hook));
        id
    }

    pub(crate) fn remove_hook(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// Record a report and return the hooks to notify
    pub(crate) fn record(&mut self, rejection: UnhandledRejection) -> Vec<RejectionHook> {
        self.reported.push(rejection);
        self.hooks.iter().map(|(_, hook)| hook.clone()).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut self.reported)
    }

    pub(crate) fn clear(&mut self) -> Vec<RejectionHook> {
        self.reported.clear();
        self.hooks.drain(..).map(|(_, hook)| hook).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn report(id: u64) -> UnhandledRejection {
        UnhandledRejection {
            promise: PromiseId(id),
            values: Values::new(),
            tick: 1,
        }
    }

    #[test]
    fn test_record_returns_registered_hooks() {
        let mut diag = Diagnostics::default();
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        diag.add_hook(Rc::new(move |_| counter.set(counter.get() + 1)));

        for hook in diag.record(report(1)) {
            hook(&report(1));
        }
        assert_eq!(seen.get(), 1);
        assert_eq!(diag.drain().len(), 1);
        assert!(diag.drain().is_empty());
    }

    #[test]
    fn test_remove_hook() {
        let mut diag = Diagnostics::default();
        let id = diag.add_hook(Rc::new(|_| {}));
        assert!(diag.remove_hook(id));
        assert!(!diag.remove_hook(id));
        assert!(diag.record(report(2)).is_empty());
    }
}
