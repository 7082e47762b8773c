//! coop-promise: cancellable promises for single-threaded cooperative runtimes
//!
//! A [`Promise`] represents a value that will be available later. It is
//! created Started and settles exactly once: Resolved, Rejected, or
//! Cancelled. Promises chain into trees; cancelling a promise cancels the
//! promises consuming it, and releases the promises it consumes once none of
//! their other consumers are still interested.
//!
//! All promises belong to a [`Runtime`], which the host drives one heartbeat
//! at a time. Handlers attached to an already settled promise run at the
//! next microtask drain, never synchronously.
//!
//! # Quick Start
//!
//! ```
//! use coop_promise::{values, Promise, Runtime};
//!
//! let (rt, clock) = Runtime::with_manual_clock();
//! let answer = Promise::delay(&rt, 1.0).and_then(|_| Ok(values![42]));
//!
//! clock.advance_secs(1.0);
//! rt.tick();
//! assert_eq!(answer.values(), Some(values![42]));
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`promise`], [`value`], [`error`](Error) |
//! | **Host** | [`runtime`], [`event_loop`], [`config`] |
//! | **Tooling** | [`diagnostics`], [`prelude`] |
#![allow(clippy::type_complexity)]

pub mod config;
pub mod diagnostics;
pub mod event_loop;
pub mod prelude;
pub mod promise;
pub mod runtime;
pub mod value;

mod error;

pub use config::RuntimeConfig;
pub use diagnostics::{HookId, UnhandledRejection};
pub use error::{Error, ErrorKind, PromiseError, Result};
pub use event_loop::{Clock, ManualClock, SystemClock, TaskId, TimerId};
pub use promise::{Promise, PromiseId, Resolver, Settled, Status};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeStats};
pub use value::{Outcome, Thenable, Value, Values};

/// coop-promise version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
