//! Continuations
//!
//! Every continuation derives a new promise that consumes its parent.
//! Handlers run when the parent settles (or at the next microtask drain if
//! it already has). A handler's `Ok` values resolve the derived promise,
//! adopting a returned promise; an `Err` or a panic rejects it.

use crate::value::{Outcome, Value, Values};

use super::{guard, Promise, Status};

pub(crate) type Handler = Box<dyn FnOnce(Values) -> Outcome>;
type StatusHandler = Box<dyn FnOnce(Status) -> Outcome>;

/// What a `finally`-style derived promise settles with
#[derive(Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// The parent's own settlement
    Forward,
    /// Whatever the handler returned
    Replace,
}

impl Promise {
    pub(crate) fn chain(&self, on_resolve: Option<Handler>, on_reject: Option<Handler>) -> Promise {
        self.mark_handled();
        let child = self.derive();
        if self.status() == Status::Cancelled {
            child.cancel();
            return child;
        }
        let target = child.clone();
        self.react(child.id, Box::new(move |status, values| {
            if target.status() != Status::Started {
                return;
            }
            let handler = match status {
                Status::Resolved => on_resolve,
                Status::Rejected => on_reject,
                Status::Started | Status::Cancelled => return,
            };
            match handler {
                Some(handler) => target.run_handler(handler, values),
                None => target.follow(status, values),
            }
        }));
        child
    }

    fn run_handler(&self, handler: Handler, values: Values) {
        match guard(move || handler(values)) {
            Ok(returned) => self.settle_resolve(returned),
            Err(fault) => self.settle_reject(vec![fault.into_rejection()]),
        }
    }

    /// Continue with `on_resolve` when this promise resolves. Rejections
    /// pass through unchanged.
    pub fn and_then<F>(&self, on_resolve: F) -> Promise
    where
        F: FnOnce(Values) -> Outcome + 'static,
    {
        self.chain(Some(Box::new(on_resolve)), None)
    }

    /// Continue with `on_resolve` or `on_reject`, whichever applies
    pub fn and_then_or<F, G>(&self, on_resolve: F, on_reject: G) -> Promise
    where
        F: FnOnce(Values) -> Outcome + 'static,
        G: FnOnce(Values) -> Outcome + 'static,
    {
        self.chain(Some(Box::new(on_resolve)), Some(Box::new(on_reject)))
    }

    /// Recover from a rejection. Resolutions pass through unchanged.
    pub fn catch<G>(&self, on_reject: G) -> Promise
    where
        G: FnOnce(Values) -> Outcome + 'static,
    {
        self.chain(None, Some(Box::new(on_reject)))
    }

    /// Observe the resolution values without changing them. If `f` returns
    /// a promise, the derived promise waits for it and rejects if it does.
    pub fn tap<F>(&self, f: F) -> Promise
    where
        F: FnOnce(Values) -> Outcome + 'static,
    {
        let rt = self.rt.clone();
        self.and_then(move |values| {
            let returned = f(values.clone())?;
            match returned.into_iter().next() {
                Some(value) if value.is_promise_shaped() => {
                    let waiter = Promise::from_value(&rt, value);
                    Ok(vec![Value::Promise(waiter.and_then_return(values))])
                }
                _ => Ok(values),
            }
        })
    }

    /// Run `f` on any settlement, including cancellation, and settle the
    /// same way the parent did. A raised fault, or a returned promise that
    /// rejects, overrides with a rejection.
    pub fn finally<F>(&self, f: F) -> Promise
    where
        F: FnOnce(Status) -> Outcome + 'static,
    {
        self.settled_with(Box::new(f), Settle::Forward, false)
    }

    /// Like [`finally`](Promise::finally) but skipped on rejection, which
    /// passes through. Does not count as handling the rejection.
    pub fn done<F>(&self, f: F) -> Promise
    where
        F: FnOnce(Status) -> Outcome + 'static,
    {
        self.settled_with(Box::new(f), Settle::Forward, true)
    }

    fn settled_with(&self, handler: StatusHandler, settle: Settle, skip_rejected: bool) -> Promise {
        if !skip_rejected {
            self.mark_handled();
        }
        let child = self.derive();
        let target = child.clone();
        let rt = self.rt.clone();
        self.react(child.id, Box::new(move |status, values| {
            if target.status() != Status::Started {
                return;
            }
            if skip_rejected && status == Status::Rejected {
                target.follow(status, values);
                return;
            }
            let returned = match guard(move || handler(status)) {
                Ok(returned) => returned,
                Err(fault) => {
                    target.settle_reject(vec![fault.into_rejection()]);
                    return;
                }
            };
            if settle == Settle::Replace && status != Status::Cancelled {
                target.settle_resolve(returned);
                return;
            }
            match returned.into_iter().next() {
                Some(value) if value.is_promise_shaped() => {
                    let waiter = Promise::from_value(&rt, value);
                    let settle = target.clone();
                    let link = waiter.watch(move |waited, rejection| {
                        if waited == Status::Rejected {
                            settle.settle_reject(rejection);
                        } else {
                            settle.follow(status, values);
                        }
                    });
                    target.resolver().on_cancel(move || link.cancel());
                }
                _ => target.follow(status, values),
            }
        }));
        child
    }

    /// [`and_then`](Promise::and_then) that calls `f(args)` and ignores the
    /// resolution values
    pub fn and_then_call<F>(&self, f: F, args: Values) -> Promise
    where
        F: FnOnce(Values) -> Outcome + 'static,
    {
        self.and_then(move |_| f(args))
    }

    /// Resolve with fixed `values` once this promise resolves
    pub fn and_then_return(&self, values: Values) -> Promise {
        self.and_then(move |_| Ok(values))
    }

    pub fn finally_call<F>(&self, f: F, args: Values) -> Promise
    where
        F: FnOnce(Values) -> Outcome + 'static,
    {
        self.finally(move |_| f(args))
    }

    /// Resolve with fixed `values` on resolution or rejection. A cancelled
    /// parent still yields a cancelled child.
    pub fn finally_return(&self, values: Values) -> Promise {
        self.settled_with(Box::new(move |_| Ok(values)), Settle::Replace, false)
    }

    pub fn done_call<F>(&self, f: F, args: Values) -> Promise
    where
        F: FnOnce(Values) -> Outcome + 'static,
    {
        self.done(move |_| f(args))
    }

    /// Resolve with fixed `values` unless this promise rejects
    pub fn done_return(&self, values: Values) -> Promise {
        self.settled_with(Box::new(move |_| Ok(values)), Settle::Replace, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::Runtime;
    use crate::values;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_handlers_on_pending_parent_run_in_attach_order() {
        let rt = Runtime::new();
        let resolvers = Rc::new(RefCell::new(Vec::new()));
        let keep = resolvers.clone();
        let p = Promise::new(&rt, move |r| {
            keep.borrow_mut().push(r);
            Ok(())
        });
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            p.and_then(move |_| {
                order.borrow_mut().push(i);
                Ok(values![])
            });
        }
        resolvers.borrow()[0].resolve(values![]);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_handler_on_settled_parent_is_deferred() {
        let rt = Runtime::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let p = Promise::resolve(&rt, values![1]);
        let child = p.and_then(move |values| {
            flag.set(true);
            Ok(values)
        });
        assert!(!ran.get());
        assert_eq!(child.status(), Status::Started);
        rt.drain();
        assert!(ran.get());
        assert_eq!(child.values(), Some(values![1]));
    }

    #[test]
    fn test_rejection_passes_through_and_then() {
        let rt = Runtime::new();
        let p = Promise::reject(&rt, values!["bad"]);
        let child = p.and_then(|_| Ok(values!["unreachable"]));
        let recovered = child.catch(|values| Ok(values));
        rt.drain();
        assert_eq!(child.status(), Status::Rejected);
        assert_eq!(recovered.values(), Some(values!["bad"]));
    }

    #[test]
    fn test_handler_fault_is_wrapped() {
        let rt = Runtime::new();
        let child = Promise::resolve(&rt, values![]).and_then(|_| Err(Value::from("oops")));
        let handled = child.catch(|values| Ok(values));
        rt.drain();
        let values = handled.values().unwrap();
        assert!(values[0].as_error().unwrap().is_kind(ErrorKind::ExecutionError));
    }

    #[test]
    fn test_tap_keeps_values() {
        let rt = Runtime::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = seen.clone();
        let p = Promise::resolve(&rt, values![1, 2]).tap(move |values| {
            *record.borrow_mut() = values;
            Ok(values!["ignored"])
        });
        rt.drain();
        assert_eq!(p.values(), Some(values![1, 2]));
        assert_eq!(*seen.borrow(), values![1, 2]);
    }

    #[test]
    fn test_finally_forwards_status() {
        let rt = Runtime::new();
        let seen = Rc::new(Cell::new(None));
        let record = seen.clone();
        let p = Promise::reject(&rt, values!["x"]).finally(move |status| {
            record.set(Some(status));
            Ok(values!["ignored"])
        });
        let handled = p.catch(|values| Ok(values));
        rt.drain();
        assert_eq!(seen.get(), Some(Status::Rejected));
        assert_eq!(p.status(), Status::Rejected);
        assert_eq!(handled.values(), Some(values!["x"]));
    }

    #[test]
    fn test_done_skips_rejection() {
        let rt = Runtime::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let p = Promise::reject(&rt, values!["x"]).done(move |_| {
            flag.set(true);
            Ok(values![])
        });
        let handled = p.catch(|values| Ok(values));
        rt.drain();
        assert!(!ran.get());
        assert_eq!(handled.values(), Some(values!["x"]));
    }

    #[test]
    fn test_return_sugar() {
        let rt = Runtime::new();
        let a = Promise::resolve(&rt, values![1]).and_then_return(values!["a"]);
        let b = Promise::reject(&rt, values![1]).finally_return(values!["b"]);
        let c = Promise::resolve(&rt, values![1]).done_return(values!["c"]);
        rt.drain();
        assert_eq!(a.values(), Some(values!["a"]));
        assert_eq!(b.values(), Some(values!["b"]));
        assert_eq!(c.values(), Some(values!["c"]));
    }

    #[test]
    fn test_call_sugar_ignores_values() {
        let rt = Runtime::new();
        let p = Promise::resolve(&rt, values![1]).and_then_call(|args| Ok(args), values!["x", "y"]);
        rt.drain();
        assert_eq!(p.values(), Some(values!["x", "y"]));
    }
}
