//! Sequential processing and retries

use std::rc::Rc;

use crate::error::PromiseError;
use crate::runtime::Runtime;
use crate::value::{Outcome, Value, Values};

use super::{first_value, Promise, Status};

/// Settle one item: plain values pass through, promise-shaped values are
/// waited on. `Err` carries rejection values.
async fn settle_item(rt: &Runtime, item: Value) -> Result<Value, Values> {
    if !item.is_promise_shaped() {
        return Ok(item);
    }
    let (status, values) = Promise::from_value(rt, item).wait_status().await;
    match status {
        Status::Resolved => Ok(first_value(values)),
        Status::Rejected => Err(values),
        Status::Started | Status::Cancelled => Err(vec![Value::Error(
            PromiseError::already_cancelled("Promise in the sequence was cancelled"),
        )]),
    }
}

impl Promise {
    /// Visit `items` one at a time, in order, waiting on any that are
    /// promises and on any promise the predicate returns. Resolves with an
    /// array of each predicate's first value. The first rejection, from an
    /// item or a predicate, rejects and stops the walk.
    pub fn each<F>(rt: &Runtime, items: Vec<Value>, predicate: F) -> Promise
    where
        F: FnMut(Value, usize) -> Outcome + 'static,
    {
        let runtime = rt.clone();
        Promise::new_async(rt, move |resolver| async move {
            let mut predicate = predicate;
            let mut results = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let item = match settle_item(&runtime, item).await {
                    Ok(item) => item,
                    Err(rejection) => {
                        resolver.reject(rejection);
                        return Ok(());
                    }
                };
                let returned = first_value(predicate(item, index)?);
                match settle_item(&runtime, returned).await {
                    Ok(value) => results.push(value),
                    Err(rejection) => {
                        resolver.reject(rejection);
                        return Ok(());
                    }
                }
            }
            resolver.resolve(vec![Value::Array(results)]);
            Ok::<(), Value>(())
        })
    }

    /// Reduce `items` in order, waiting on promise-shaped items and on
    /// promise-shaped accumulators. Resolves with the final accumulator.
    pub fn fold<F>(rt: &Runtime, items: Vec<Value>, reducer: F, initial: Value) -> Promise
    where
        F: FnMut(Value, Value, usize) -> Outcome + 'static,
    {
        let runtime = rt.clone();
        Promise::new_async(rt, move |resolver| async move {
            let mut reducer = reducer;
            let mut accumulator = match settle_item(&runtime, initial).await {
                Ok(value) => value,
                Err(rejection) => {
                    resolver.reject(rejection);
                    return Ok(());
                }
            };
            for (index, item) in items.into_iter().enumerate() {
                let item = match settle_item(&runtime, item).await {
                    Ok(item) => item,
                    Err(rejection) => {
                        resolver.reject(rejection);
                        return Ok(());
                    }
                };
                let returned = first_value(reducer(accumulator, item, index)?);
                accumulator = match settle_item(&runtime, returned).await {
                    Ok(value) => value,
                    Err(rejection) => {
                        resolver.reject(rejection);
                        return Ok(());
                    }
                };
            }
            resolver.resolve(vec![accumulator]);
            Ok::<(), Value>(())
        })
    }

    /// Call `callback` until its promise resolves, retrying up to `times`
    /// more times after the first attempt. Rejects with the last attempt's
    /// rejection.
    pub fn retry<F>(rt: &Runtime, callback: F, times: usize) -> Promise
    where
        F: Fn() -> Promise + 'static,
    {
        retry_attempt(rt, Rc::new(callback), times, None)
    }

    /// Like [`retry`](Promise::retry), waiting `seconds` between attempts
    pub fn retry_with_delay<F>(rt: &Runtime, callback: F, times: usize, seconds: f64) -> Promise
    where
        F: Fn() -> Promise + 'static,
    {
        retry_attempt(rt, Rc::new(callback), times, Some(seconds))
    }
}

fn retry_attempt(
    rt: &Runtime,
    callback: Rc<dyn Fn() -> Promise>,
    times: usize,
    pause: Option<f64>,
) -> Promise {
    let attempt = {
        let callback = callback.clone();
        Promise::attempt(rt, move || Ok(vec![Value::Promise(callback())]))
    };
    let rt = rt.clone();
    attempt.catch(move |rejection| {
        if times == 0 {
            return Ok(vec![Value::Promise(Promise::reject(&rt, rejection))]);
        }
        let next = match pause {
            Some(seconds) => {
                let runtime = rt.clone();
                Promise::delay(&rt, seconds).and_then(move |_| {
                    Ok(vec![Value::Promise(retry_attempt(&runtime, callback, times - 1, pause))])
                })
            }
            None => retry_attempt(&rt, callback, times - 1, pause),
        };
        Ok(vec![Value::Promise(next)])
    })
}
