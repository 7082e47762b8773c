//! Error types for coop-promise
//!
//! Two layers live here. [`PromiseError`] is the structured fault that travels
//! *inside* a promise as a rejection value, tagged with an [`ErrorKind`] and
//! optionally chained to the error that caused it. [`Error`] is what the Rust
//! API hands back to callers that leave the promise world (`expect`,
//! `block_on`, configuration loading).

use std::fmt;
use thiserror::Error;

use crate::promise::PromiseId;
use crate::value::{format_values, Values};

/// Kinds of structured faults produced by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An executor or handler raised a fault that was not already structured
    ExecutionError,
    /// The operation targeted a promise that had been cancelled
    AlreadyCancelled,
    /// `now()` found the promise unresolved
    NotResolvedInTime,
    /// `timeout()` expired before the promise settled
    TimedOut,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ExecutionError => write!(f, "ExecutionError"),
            ErrorKind::AlreadyCancelled => write!(f, "AlreadyCancelled"),
            ErrorKind::NotResolvedInTime => write!(f, "NotResolvedInTime"),
            ErrorKind::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// A structured fault carried as a rejection value.
///
/// Errors form a chain through `parent`: when a promise rejects because
/// something it depended on failed, the new error is an
/// [`extend`](PromiseError::extend) of the old one, so the full causal history
/// survives across adoption boundaries.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct PromiseError {
    /// Fault classification
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Where or why the fault was produced
    pub context: Option<String>,
    /// The error this one was derived from
    #[source]
    pub parent: Option<Box<PromiseError>>,
}

impl PromiseError {
    /// Create a new structured error with no context or parent
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
            parent: None,
        }
    }

    /// An uncaught fault from an executor or handler
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionError, message)
    }

    pub fn already_cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyCancelled, message)
    }

    pub fn not_resolved_in_time() -> Self {
        Self::new(
            ErrorKind::NotResolvedInTime,
            "This Promise was not resolved in time for now()",
        )
    }

    pub fn timed_out(seconds: f64) -> Self {
        Self::new(ErrorKind::TimedOut, "Timed out")
            .with_context(format!("Timeout of {} seconds exceeded", seconds))
    }

    /// Attach context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Derive a new error of the same kind whose parent is `self`
    pub fn extend(&self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            message: message.into(),
            context: None,
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Whether this error has the given kind
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// This error followed by each of its ancestors, newest first
    pub fn chain(&self) -> Vec<&PromiseError> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Render the whole chain, one block per error
    pub fn report(&self) -> String {
        let mut out = String::new();
        for err in self.chain() {
            out.push_str(&format!("-- Promise.Error({}) --\n{}\n", err.kind, err.message));
            if let Some(ref context) = err.context {
                out.push_str(context);
                out.push('\n');
            }
        }
        out
    }
}

/// Main error type for the Rust-facing API
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The promise rejected with a structured fault, or was cancelled
    #[error(transparent)]
    Promise(#[from] PromiseError),

    /// The promise rejected with plain values
    #[error("promise rejected with {}", format_values(.0))]
    Rejected(Values),

    /// `block_on` ran out of work while the promise was still pending
    #[error("runtime stalled: {0} is still pending and nothing is scheduled")]
    Stalled(PromiseId),

    /// Invalid runtime configuration
    #[error("ConfigError: {0}")]
    Config(String),
}

/// Result type alias for coop-promise
pub type Result<T> = std::result::Result<T, Error>;
