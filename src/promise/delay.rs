//! Timer-backed promises

use std::time::Duration;

use crate::runtime::Runtime;
use crate::value::Value;

use super::Promise;

impl Promise {
    /// Resolve with the seconds actually elapsed, no sooner than `seconds`
    /// from now. Requests below the timer resolution, and non-finite
    /// requests, are clamped to the minimum. Durations too long to
    /// represent wait forever. Cancelling removes the timer.
    pub fn delay(rt: &Runtime, seconds: f64) -> Promise {
        let seconds = rt.with(|inner| inner.config.clamp_delay(seconds));
        let wait = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
        let runtime = rt.clone();
        Promise::new(rt, move |resolver| {
            let settle = resolver.clone();
            let timer = runtime.schedule_after(
                wait,
                Box::new(move |elapsed| settle.resolve(vec![Value::Number(elapsed.as_secs_f64())])),
            );
            resolver.on_cancel(move || {
                runtime.cancel_timer(timer);
            });
            Ok(())
        })
    }
}
