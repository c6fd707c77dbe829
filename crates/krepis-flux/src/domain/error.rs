//! Domain Model: Flux Error Types
//!
//! Every terminal failure travelling through a pipeline is a [`FluxError`].
//! Errors are cloned when a subscription is replayed (retry, re-subscription),
//! so the underlying failure reason is shared behind an `Arc`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flux Error Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal failure signalled on a subscription
#[derive(Debug, Clone, thiserror::Error)]
pub enum FluxError {
    /// An upstream producer explicitly signalled failure
    ///
    /// The typed reason is kept so recovery operators can inspect it with
    /// [`FluxError::downcast_ref`].
    #[error("source failure: {0}")]
    Source(Arc<anyhow::Error>),

    /// An operator or emitter was used outside its contract
    /// (e.g. two `next` calls within one `generate` invocation)
    #[error("operator contract violated in {operator}: {reason}")]
    ContractViolation {
        operator: &'static str,
        reason: String,
    },

    /// A scheduler could not accept work (shut down or worker unavailable)
    #[error("scheduler '{scheduler}' rejected work: {reason}")]
    SchedulerRejected { scheduler: String, reason: String },

    /// A blocking wait gave up before the sequence terminated
    #[error("no terminal signal within {0:?}")]
    Timeout(Duration),
}

/// Coarse classification of [`FluxError`], used by verifier expectations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`FluxError::Source`]
    SourceFailure,
    /// See [`FluxError::ContractViolation`]
    ContractViolation,
    /// See [`FluxError::SchedulerRejected`]
    SchedulerRejection,
    /// See [`FluxError::Timeout`]
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceFailure => "SourceFailure",
            Self::ContractViolation => "ContractViolation",
            Self::SchedulerRejection => "SchedulerRejection",
            Self::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

impl FluxError {
    /// Wrap any error (or `anyhow!` message) as a source failure
    pub fn failure<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Source(Arc::new(error.into()))
    }

    /// Source failure carrying only a message
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Source(Arc::new(anyhow::Error::msg(message)))
    }

    /// Contract violation raised by `operator`
    pub fn contract(operator: &'static str, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            operator,
            reason: reason.into(),
        }
    }

    /// Rejection raised by the scheduler named `scheduler`
    pub fn rejected(scheduler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchedulerRejected {
            scheduler: scheduler.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Source(_) => ErrorKind::SourceFailure,
            Self::ContractViolation { .. } => ErrorKind::ContractViolation,
            Self::SchedulerRejected { .. } => ErrorKind::SchedulerRejection,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Borrow the typed reason of a source failure
    ///
    /// Returns `None` for every other variant, or when the reason is of a
    /// different type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Source(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Numeric error code, grouped by kind
    ///
    /// - 1000-1099: source failures
    /// - 2000-2099: contract violations
    /// - 3000-3099: scheduler rejections
    /// - 4000-4099: timeouts
    pub fn code(&self) -> u32 {
        match self {
            Self::Source(_) => 1001,
            Self::ContractViolation { .. } => 2001,
            Self::SchedulerRejected { .. } => 3001,
            Self::Timeout(_) => 4001,
        }
    }

    /// Category string for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Source(_) => "SOURCE_ERROR",
            Self::ContractViolation { .. } => "CONTRACT_ERROR",
            Self::SchedulerRejected { .. } => "SCHEDULER_ERROR",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    /// Whether re-subscribing could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("index {0} out of bounds")]
    struct IndexOutOfBounds(usize);

    #[test]
    fn test_error_codes() {
        assert_eq!(FluxError::msg("boom").code(), 1001);
        assert_eq!(FluxError::contract("generate", "x").code(), 2001);
        assert_eq!(FluxError::rejected("single", "disposed").code(), 3001);
        assert_eq!(FluxError::Timeout(Duration::from_secs(1)).code(), 4001);
    }

    #[test]
    fn test_error_kinds_and_categories() {
        let err = FluxError::rejected("pool", "disposed");
        assert_eq!(err.kind(), ErrorKind::SchedulerRejection);
        assert_eq!(err.category(), "SCHEDULER_ERROR");
        assert!(!err.is_recoverable());
        assert!(FluxError::msg("x").is_recoverable());
    }

    #[test]
    fn test_typed_reason_survives_clone() {
        let err = FluxError::failure(IndexOutOfBounds(7));
        let cloned = err.clone();

        let reason = cloned.downcast_ref::<IndexOutOfBounds>().unwrap();
        assert_eq!(reason.0, 7);
        assert!(cloned.downcast_ref::<std::io::Error>().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = FluxError::contract("generate", "more than one call to next");
        let msg = err.to_string();
        assert!(msg.contains("generate"));
        assert!(msg.contains("more than one call to next"));
        assert_eq!(ErrorKind::ContractViolation.to_string(), "ContractViolation");
    }
}
