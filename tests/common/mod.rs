//! Shared test helpers for integration tests
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use coop_promise::{ManualClock, Promise, Resolver, Runtime};

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per test binary.
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=coop_promise=trace`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A runtime on virtual time
pub fn manual_runtime() -> (Runtime, Rc<ManualClock>) {
    init_tracing();
    Runtime::with_manual_clock()
}

/// A Started promise together with the resolver that settles it
pub fn pending(rt: &Runtime) -> (Promise, Resolver) {
    let slot = Rc::new(RefCell::new(None));
    let keep = slot.clone();
    let promise = Promise::new(rt, move |resolver| {
        *keep.borrow_mut() = Some(resolver);
        Ok(())
    });
    let resolver = slot
        .borrow_mut()
        .take()
        .expect("executor runs synchronously");
    (promise, resolver)
}

/// Append-only log shared with handlers
#[derive(Clone)]
pub struct Log<T>(Rc<RefCell<Vec<T>>>);

impl<T: Clone> Log<T> {
    pub fn new() -> Self {
        Log(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn push(&self, item: T) {
        self.0.borrow_mut().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}
