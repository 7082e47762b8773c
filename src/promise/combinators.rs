//! Aggregation over groups of promises
//!
//! Each combinator returns a fresh promise that watches its inputs through
//! link nodes. Once the aggregate settles, the links to inputs that are
//! still running are cancelled, which in turn cancels any input left with
//! no other live consumer. Cancelling the aggregate does the same for every
//! input.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::PromiseError;
use crate::runtime::Runtime;
use crate::value::Value;

use super::{first_value, Promise, Resolver, Status};

/// Link nodes held by an aggregate
#[derive(Clone, Default)]
struct Links(Rc<RefCell<Vec<Promise>>>);

impl Links {
    fn push(&self, link: Promise) {
        self.0.borrow_mut().push(link);
    }

    fn cancel_all(&self) {
        let links = self.0.borrow().clone();
        for link in links {
            link.cancel();
        }
    }

    /// Cancel every link when the aggregate is cancelled
    fn release_on_cancel(&self, resolver: &Resolver) {
        let links = self.clone();
        resolver.on_cancel(move || links.cancel_all());
    }
}

fn cancelled_input(index: usize) -> Value {
    Value::Error(PromiseError::already_cancelled(format!(
        "Promise at index {} was cancelled",
        index
    )))
}

impl Promise {
    /// Resolve with an array of each input's first value, in input order,
    /// once all resolve. The first rejection rejects with its values; a
    /// cancelled input rejects with `AlreadyCancelled`.
    pub fn all(rt: &Runtime, promises: Vec<Promise>) -> Promise {
        Promise::new(rt, move |resolver| {
            let total = promises.len();
            if total == 0 {
                resolver.resolve(vec![Value::Array(Vec::new())]);
                return Ok(());
            }

            struct Gather {
                slots: Vec<Value>,
                resolved: usize,
                done: bool,
            }
            let state = Rc::new(RefCell::new(Gather {
                slots: vec![Value::Nil; total],
                resolved: 0,
                done: false,
            }));
            let links = Links::default();
            links.release_on_cancel(&resolver);

            for (index, input) in promises.iter().enumerate() {
                let state = state.clone();
                let resolver = resolver.clone();
                let siblings = links.clone();
                links.push(input.watch(move |status, values| {
                    let finished = {
                        let mut state = state.borrow_mut();
                        if state.done {
                            return;
                        }
                        match status {
                            Status::Resolved => {
                                state.slots[index] = first_value(values);
                                state.resolved += 1;
                                if state.resolved < total {
                                    return;
                                }
                                state.done = true;
                                Ok(std::mem::take(&mut state.slots))
                            }
                            Status::Rejected => {
                                state.done = true;
                                Err(values)
                            }
                            Status::Cancelled => {
                                state.done = true;
                                Err(vec![cancelled_input(index)])
                            }
                            Status::Started => return,
                        }
                    };
                    match finished {
                        Ok(slots) => resolver.resolve(vec![Value::Array(slots)]),
                        Err(rejection) => {
                            resolver.reject(rejection);
                            siblings.cancel_all();
                        }
                    }
                }));
            }
            Ok(())
        })
    }

    /// Resolve, once every input has left Started, with an array of their
    /// statuses in input order. Never rejects.
    pub fn all_settled(rt: &Runtime, promises: Vec<Promise>) -> Promise {
        Promise::new(rt, move |resolver| {
            let total = promises.len();
            if total == 0 {
                resolver.resolve(vec![Value::Array(Vec::new())]);
                return Ok(());
            }

            let state = Rc::new(RefCell::new((vec![Value::Nil; total], 0usize)));
            let links = Links::default();
            links.release_on_cancel(&resolver);

            for (index, input) in promises.iter().enumerate() {
                let state = state.clone();
                let resolver = resolver.clone();
                links.push(input.watch(move |status, _values| {
                    let statuses = {
                        let mut state = state.borrow_mut();
                        state.0[index] = Value::Status(status);
                        state.1 += 1;
                        if state.1 < total {
                            return;
                        }
                        std::mem::take(&mut state.0)
                    };
                    resolver.resolve(vec![Value::Array(statuses)]);
                }));
            }
            Ok(())
        })
    }

    /// Settle exactly as the first input to resolve or reject, cancelling
    /// the rest. Cancels if every input is cancelled.
    pub fn race(rt: &Runtime, promises: Vec<Promise>) -> Promise {
        Promise::new(rt, move |resolver| {
            let total = promises.len();
            let state = Rc::new(RefCell::new((false, 0usize)));
            let links = Links::default();
            links.release_on_cancel(&resolver);

            for input in promises.iter() {
                let state = state.clone();
                let resolver = resolver.clone();
                let siblings = links.clone();
                links.push(input.watch(move |status, values| {
                    {
                        let mut state = state.borrow_mut();
                        if state.0 {
                            return;
                        }
                        if status == Status::Cancelled {
                            state.1 += 1;
                            if state.1 < total {
                                return;
                            }
                        }
                        state.0 = true;
                    }
                    match status {
                        Status::Resolved => resolver.resolve(values),
                        Status::Rejected => resolver.reject(values),
                        Status::Cancelled => resolver.promise().cancel(),
                        Status::Started => {}
                    }
                    siblings.cancel_all();
                }));
            }
            Ok(())
        })
    }

    /// Resolve with the first `count` resolution values, in resolution
    /// order, cancelling the rest. Rejects as soon as `count` can no longer
    /// be reached, with an array of every rejection seen so far in the
    /// order they happened; cancelled inputs count as `AlreadyCancelled`
    /// rejections.
    pub fn some(rt: &Runtime, promises: Vec<Promise>, count: usize) -> Promise {
        Promise::new(rt, move |resolver| {
            let total = promises.len();
            if count == 0 {
                resolver.resolve(vec![Value::Array(Vec::new())]);
                return Ok(());
            }
            if count > total {
                resolver.reject(vec![Value::Array(Vec::new())]);
                return Ok(());
            }

            struct Tally {
                resolved: Vec<Value>,
                rejected: Vec<Value>,
                done: bool,
            }
            let state = Rc::new(RefCell::new(Tally {
                resolved: Vec::new(),
                rejected: Vec::new(),
                done: false,
            }));
            let links = Links::default();
            links.release_on_cancel(&resolver);

            for (index, input) in promises.iter().enumerate() {
                let state = state.clone();
                let resolver = resolver.clone();
                let siblings = links.clone();
                links.push(input.watch(move |status, values| {
                    let finished = {
                        let mut state = state.borrow_mut();
                        if state.done {
                            return;
                        }
                        match status {
                            Status::Resolved => {
                                state.resolved.push(first_value(values));
                                if state.resolved.len() < count {
                                    return;
                                }
                                state.done = true;
                                Ok(std::mem::take(&mut state.resolved))
                            }
                            Status::Rejected | Status::Cancelled => {
                                let rejection = if status == Status::Rejected {
                                    first_value(values)
                                } else {
                                    cancelled_input(index)
                                };
                                state.rejected.push(rejection);
                                if total - state.rejected.len() >= count {
                                    return;
                                }
                                state.done = true;
                                Err(std::mem::take(&mut state.rejected))
                            }
                            Status::Started => return,
                        }
                    };
                    match finished {
                        Ok(resolved) => resolver.resolve(vec![Value::Array(resolved)]),
                        Err(rejected) => resolver.reject(vec![Value::Array(rejected)]),
                    }
                    siblings.cancel_all();
                }));
            }
            Ok(())
        })
    }

    /// Resolve with the first input to resolve. Rejects only once every
    /// input has rejected, with an array of their rejection values.
    pub fn any(rt: &Runtime, promises: Vec<Promise>) -> Promise {
        Promise::some(rt, promises, 1).and_then(|values| {
            let winner = match values.into_iter().next() {
                Some(Value::Array(items)) => items.into_iter().next().unwrap_or(Value::Nil),
                _ => Value::Nil,
            };
            Ok(vec![winner])
        })
    }

    /// Race this promise against a timer. On expiry the result rejects with
    /// `rejection`, or a `TimedOut` error, and this promise is cancelled
    /// unless something else consumes it.
    pub fn timeout(&self, seconds: f64, rejection: Option<Value>) -> Promise {
        let rt = self.rt.clone();
        let rejection = rejection.unwrap_or_else(|| Value::Error(PromiseError::timed_out(seconds)));
        let expiry = Promise::delay(&rt, seconds).and_then({
            let rt = rt.clone();
            move |_| Ok(vec![Value::Promise(Promise::reject(&rt, vec![rejection]))])
        });
        Promise::race(&rt, vec![expiry, self.clone()])
    }

    /// A promise that is resolved right now with this promise's values if
    /// this promise has resolved, and otherwise rejected with `rejection`,
    /// or a `NotResolvedInTime` error.
    pub fn now(&self, rejection: Option<Value>) -> Promise {
        if self.status() == Status::Resolved {
            self.mark_handled();
            let child = self.derive();
            child.transition(Status::Resolved, self.values().unwrap_or_default());
            return child;
        }
        let rejection =
            rejection.unwrap_or_else(|| Value::Error(PromiseError::not_resolved_in_time()));
        Promise::reject(&self.rt, vec![rejection])
    }
}
