//! Suspension on promises
//!
//! Awaiting a promise attaches an internal consumer, so a waiter counts
//! toward cancellation propagation: dropping an unfinished [`Settled`]
//! future releases its claim, and a promise nobody else consumes is then
//! cancelled.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, PromiseError, Result};
use crate::value::{Value, Values};

use super::{Promise, Status};

#[derive(Default)]
struct Slot {
    outcome: Option<(Status, Values)>,
    waker: Option<Waker>,
}

/// Future returned by [`Promise::wait_status`]
#[must_use = "futures do nothing unless polled"]
pub struct Settled {
    promise: Promise,
    link: Option<Promise>,
    slot: Rc<RefCell<Slot>>,
}

impl Future for Settled {
    type Output = (Status, Values);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.slot.borrow_mut().outcome.take() {
            this.link = None;
            return Poll::Ready(outcome);
        }
        if this.link.is_none() {
            let status = this.promise.status();
            if status.is_terminal() {
                return Poll::Ready((status, this.promise.values().unwrap_or_default()));
            }
        }
        this.slot.borrow_mut().waker = Some(cx.waker().clone());
        if this.link.is_none() {
            let slot = this.slot.clone();
            this.link = Some(this.promise.watch(move |status, values| {
                let waker = {
                    let mut slot = slot.borrow_mut();
                    slot.outcome = Some((status, values));
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }));
        }
        Poll::Pending
    }
}

impl Drop for Settled {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel();
        }
    }
}

impl IntoFuture for Promise {
    type Output = (Status, Values);
    type IntoFuture = Settled;

    fn into_future(self) -> Settled {
        self.wait_status()
    }
}

/// Map a settlement onto the Rust-facing result
pub(crate) fn expect_outcome(status: Status, values: Values) -> Result<Values> {
    match status {
        Status::Resolved => Ok(values),
        Status::Rejected => match values.as_slice() {
            [Value::Error(err)] => Err(Error::Promise(err.clone())),
            _ => Err(Error::Rejected(values)),
        },
        Status::Started | Status::Cancelled => Err(Error::Promise(
            PromiseError::already_cancelled("Promise was cancelled while being waited on"),
        )),
    }
}

impl Promise {
    /// Suspend until this promise leaves Started
    pub fn wait_status(&self) -> Settled {
        self.mark_handled();
        Settled {
            promise: self.clone(),
            link: None,
            slot: Rc::new(RefCell::new(Slot::default())),
        }
    }

    /// Suspend until settled; `true` only when resolved
    pub async fn wait(&self) -> (bool, Values) {
        let (status, values) = self.wait_status().await;
        (status == Status::Resolved, values)
    }

    /// Suspend until settled and return the resolution values. A rejection
    /// or cancellation becomes an error.
    pub async fn expect(&self) -> Result<Values> {
        let (status, values) = self.wait_status().await;
        expect_outcome(status, values)
    }
}
