//! Prelude module for convenient imports
//!
//! Brings the types needed to create, chain and drive promises into scope:
//!
//! ```
//! use coop_promise::prelude::*;
//!
//! let rt = Runtime::new();
//! let p = Promise::resolve(&rt, values!["ready"]);
//! assert_eq!(rt.expect(&p).unwrap(), values!["ready"]);
//! ```

// Core promise types
pub use crate::promise::{Promise, PromiseId, Resolver, Status};

// Values carried by promises
pub use crate::value::{Outcome, Thenable, Value, Values};
pub use crate::values;

// Host runtime
pub use crate::runtime::{Runtime, RuntimeStats};
pub use crate::config::RuntimeConfig;
pub use crate::event_loop::{Clock, ManualClock};

// Error handling
pub use crate::error::{Error, ErrorKind, PromiseError, Result};

// Version constant
pub use crate::VERSION;
