//! Contract for system task executables.
//!
//! An executable receives a [`TaskContext`] bound to the scheduler's open
//! transaction and returns either nothing or a short human-readable message.
//! The return contract is enforced by the type system: only values
//! convertible into [`TaskOutput`] can be registered.

use crate::pipeline::services::TaskContext;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Error type returned by failing executables.
pub type TaskFailure = Box<dyn StdError + Send + Sync>;

/// Shared, type-erased executable stored in the registry.
pub type TaskExecutable =
    Arc<dyn Fn(&mut TaskContext<'_>) -> Result<TaskOutput, TaskFailure> + Send + Sync>;

/// Optional message produced by a successful executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput(Option<String>);

impl TaskOutput {
    /// Output with no message.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Output carrying a message. Blank messages are discarded.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        let value = text.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self(None);
        }
        Self(Some(trimmed.to_owned()))
    }

    /// Consumes the output and returns its message.
    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.0
    }
}

impl From<()> for TaskOutput {
    fn from((): ()) -> Self {
        Self::none()
    }
}

impl From<String> for TaskOutput {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&'static str> for TaskOutput {
    fn from(value: &'static str) -> Self {
        Self::message(value)
    }
}

impl From<Option<String>> for TaskOutput {
    fn from(value: Option<String>) -> Self {
        value.map_or_else(Self::none, Self::message)
    }
}

/// Failure that records the stack where it was raised.
///
/// Displays as the wrapped error and exposes the same `source()` chain. The
/// trace is captured on construction, so it is only populated when
/// `RUST_BACKTRACE` enables capture.
pub struct TracedFailure {
    inner: TaskFailure,
    trace: Backtrace,
}

impl TracedFailure {
    /// Wraps `error`, capturing the current stack.
    #[must_use]
    pub fn new(error: impl Into<TaskFailure>) -> Self {
        Self::with_trace(error.into(), Backtrace::capture())
    }

    pub(crate) const fn with_trace(inner: TaskFailure, trace: Backtrace) -> Self {
        Self { inner, trace }
    }

    /// Returns the stack captured when the failure was raised.
    #[must_use]
    pub const fn trace(&self) -> &Backtrace {
        &self.trace
    }
}

impl fmt::Debug for TracedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedFailure")
            .field("inner", &self.inner)
            .field("trace", &self.trace.status())
            .finish()
    }
}

impl fmt::Display for TracedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for TracedFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Renders an executable failure as a diagnostic: the error, each `source()`
/// in its chain, and the stack of the first [`TracedFailure`] in the chain
/// that captured one.
#[must_use]
pub fn render_diagnostic(failure: &(dyn StdError + 'static)) -> String {
    let mut diagnostic = failure.to_string();
    let mut trace = captured_trace(failure);
    let mut source = failure.source();
    while let Some(cause) = source {
        let _ignored = write!(diagnostic, "\ncaused by: {cause}");
        trace = trace.or_else(|| captured_trace(cause));
        source = cause.source();
    }
    if let Some(captured) = trace {
        let _ignored = write!(diagnostic, "\n\nbacktrace:\n{captured}");
    }
    diagnostic
}

fn captured_trace<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a Backtrace> {
    error
        .downcast_ref::<TracedFailure>()
        .map(TracedFailure::trace)
        .filter(|trace| trace.status() == BacktraceStatus::Captured)
}

/// Renders a caught panic payload as a diagnostic.
#[must_use]
pub fn render_panic(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    format!("task executable panicked: {detail}")
}
