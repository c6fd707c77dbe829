//! Verification failures

use std::time::Duration;
use thiserror::Error;

/// Why a verification run failed
///
/// `step` is the zero-based index of the expectation that failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// A signal of the wrong type arrived (e.g. completion instead of a value)
    #[error("step {step}: expected {expected}, got {actual}")]
    UnexpectedSignal {
        step: usize,
        expected: String,
        actual: String,
    },

    /// A value arrived but differs from the expected one
    #[error("step {step}: expected value {expected}, got {actual}")]
    ValueMismatch {
        step: usize,
        expected: String,
        actual: String,
    },

    /// A value or error was rejected by a user predicate
    #[error("step {step}: {description} rejected {actual}")]
    PredicateFailed {
        step: usize,
        description: String,
        actual: String,
    },

    /// Nothing arrived within the verifier timeout
    #[error("step {step}: timed out after {waited:?} waiting for {expected}")]
    TimedOut {
        step: usize,
        expected: String,
        waited: Duration,
    },

    /// The script ended without a terminal expectation
    #[error("no terminal expectation after {steps} steps (add expect_complete, expect_error or then_cancel)")]
    MissingTerminal { steps: usize },
}

impl VerifyError {
    /// Index of the failed step, if the failure belongs to one
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::UnexpectedSignal { step, .. }
            | Self::ValueMismatch { step, .. }
            | Self::PredicateFailed { step, .. }
            | Self::TimedOut { step, .. } => Some(*step),
            Self::MissingTerminal { .. } => None,
        }
    }

    /// Whether the run ended in the timed-out state
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Stable error code, in the numbering of
    /// [`FluxError::code`](crate::domain::error::FluxError::code)
    pub fn code(&self) -> u32 {
        match self {
            Self::UnexpectedSignal { .. } => 5001,
            Self::ValueMismatch { .. } => 5002,
            Self::PredicateFailed { .. } => 5003,
            Self::TimedOut { .. } => 5004,
            Self::MissingTerminal { .. } => 5005,
        }
    }
}
