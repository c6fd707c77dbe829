//! Scripted expectations

use crate::domain::error::FluxError;
use std::fmt;
use std::time::Duration;

/// Outcome of checking one value; `Err` carries the failure description
pub(crate) type ValueCheck<T> = Box<dyn FnMut(T) -> Result<(), ValueFailure> + Send>;

pub(crate) type ErrorCheck = Box<dyn FnMut(&FluxError) -> bool + Send>;

/// Why a value check failed
pub(crate) enum ValueFailure {
    Mismatch { expected: String, actual: String },
    Rejected { description: String, actual: String },
}

pub(crate) enum Step<T> {
    Subscription,
    Next(ValueCheck<T>),
    NextCount(u64),
    NoEvent(Duration),
    Await(Duration),
    Complete,
    Error { description: String, check: ErrorCheck },
    Cancel,
}

impl<T> Step<T> {
    /// Whether the step ends the script
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Step::Complete | Step::Error { .. } | Step::Cancel)
    }
}

impl<T> fmt::Display for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Subscription => f.write_str("subscription"),
            Step::Next(_) => f.write_str("next value"),
            Step::NextCount(n) => write!(f, "{n} values"),
            Step::NoEvent(d) => write!(f, "no event for {d:?}"),
            Step::Await(d) => write!(f, "await {d:?}"),
            Step::Complete => f.write_str("completion"),
            Step::Error { description, .. } => write!(f, "error ({description})"),
            Step::Cancel => f.write_str("cancel"),
        }
    }
}
