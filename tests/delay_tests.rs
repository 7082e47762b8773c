//! Timer-backed promises on virtual time

mod common;

use std::time::Duration;

use common::manual_runtime;
use coop_promise::{values, Promise, Runtime, RuntimeConfig, Status, Value};
use pretty_assertions::assert_eq;

#[test]
fn test_delay_resolves_with_actual_elapsed_time() {
    let (rt, clock) = manual_runtime();
    let p = Promise::delay(&rt, 1.0);

    clock.advance(Duration::from_millis(1500));
    rt.tick();
    assert_eq!(p.values(), Some(values![1.5]));
}

#[test]
fn test_delay_not_fired_early() {
    let (rt, clock) = manual_runtime();
    let p = Promise::delay(&rt, 1.0);
    clock.advance(Duration::from_millis(999));
    rt.tick();
    assert_eq!(p.status(), Status::Started);
}

#[test]
fn test_invalid_delays_clamp_to_resolution() {
    let (rt, clock) = manual_runtime();
    let min = rt.config().min_delay();
    let nan = Promise::delay(&rt, f64::NAN);
    let infinite = Promise::delay(&rt, f64::INFINITY);
    let negative = Promise::delay(&rt, -5.0);
    let tiny = Promise::delay(&rt, 1e-9);

    clock.advance(min);
    rt.tick();
    for p in [&nan, &infinite, &negative, &tiny] {
        assert_eq!(p.status(), Status::Resolved);
    }
}

#[test]
fn test_configured_resolution() {
    let config = RuntimeConfig::from_json(r#"{ "min_delay_secs": 0.5 }"#).unwrap();
    let clock = std::rc::Rc::new(coop_promise::ManualClock::new());
    let rt = Runtime::builder().config(config).clock(clock.clone()).build().unwrap();

    let p = Promise::delay(&rt, 0.1);
    clock.advance(Duration::from_millis(100));
    rt.tick();
    assert_eq!(p.status(), Status::Started);
    clock.advance(Duration::from_millis(400));
    rt.tick();
    assert_eq!(p.values(), Some(vec![Value::Number(0.5)]));
}

#[test]
fn test_cancel_removes_timer_immediately() {
    let (rt, _clock) = manual_runtime();
    let keep = Promise::delay(&rt, 3.0);
    let drop_me = Promise::delay(&rt, 3.0);
    assert_eq!(rt.pending_timers(), 2);

    drop_me.cancel();
    assert_eq!(rt.pending_timers(), 1);
    assert_eq!(keep.status(), Status::Started);
    assert_eq!(rt.stats().event_loop.timers_cancelled, 1);
}

#[test]
fn test_cancelling_chain_releases_timer() {
    let (rt, _clock) = manual_runtime();
    let chained = Promise::delay(&rt, 3.0).and_then_return(values!["never"]);
    chained.cancel();
    assert_eq!(rt.pending_timers(), 0);
}

#[test]
fn test_timers_fire_in_deadline_order() {
    let (rt, clock) = manual_runtime();
    let log = common::Log::new();
    for secs in [3.0, 1.0, 2.0] {
        let log = log.clone();
        Promise::delay(&rt, secs).and_then(move |values| {
            log.push(secs);
            Ok(values)
        });
    }
    clock.advance(Duration::from_secs(3));
    rt.tick();
    assert_eq!(log.items(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_delays_beyond_duration_range_stay_pending() {
    let (rt, clock) = manual_runtime();
    let (source, _resolver) = common::pending(&rt);
    let huge = Promise::delay(&rt, 1e20);
    let guarded = source.timeout(f64::MAX, None);
    assert_eq!(rt.pending_timers(), 2);

    clock.advance(Duration::from_secs(1_000_000));
    rt.tick();
    assert_eq!(huge.status(), Status::Started);
    assert_eq!(guarded.status(), Status::Started);

    huge.cancel();
    guarded.cancel();
    assert_eq!(rt.pending_timers(), 0);
}

#[test]
fn test_block_on_system_clock_short_delay() {
    let rt = Runtime::new();
    let p = Promise::delay(&rt, 0.02);
    let values = rt.expect(&p).unwrap();
    assert!(values[0].as_number().unwrap() >= 0.02);
}
