//! Scheduler Types
//!
//! Basic types shared by the scheduler front end and its worker pool.

use crate::domain::error::FluxError;
use std::fmt;

/// Execution context flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerKind {
    /// Runs work inline on the calling thread
    Immediate,
    /// One dedicated worker thread
    Single,
    /// Fixed-size pool of worker threads
    Pooled,
    /// Pool sized to the available hardware parallelism
    Parallel,
}

impl SchedulerKind {
    /// Whether this kind owns worker threads
    pub fn is_threaded(self) -> bool {
        !matches!(self, Self::Immediate)
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Immediate => "IMMEDIATE",
            Self::Single => "SINGLE",
            Self::Pooled => "POOLED",
            Self::Parallel => "PARALLEL",
        };
        f.write_str(name)
    }
}

/// Reasons a scheduler refuses work
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// `dispose` was called; no new work is accepted
    #[error("scheduler '{name}' is disposed")]
    Disposed { name: String },

    /// A worker thread could not be started
    #[error("scheduler '{name}' failed to start worker {index}: {reason}")]
    SpawnFailed {
        name: String,
        index: usize,
        reason: String,
    },

    /// The worker behind a pinned handle is gone
    #[error("worker {index} of scheduler '{name}' is unavailable")]
    WorkerUnavailable { name: String, index: usize },
}

impl SchedulerError {
    /// Name of the scheduler that raised the error
    pub fn scheduler(&self) -> &str {
        match self {
            Self::Disposed { name }
            | Self::SpawnFailed { name, .. }
            | Self::WorkerUnavailable { name, .. } => name,
        }
    }
}

impl From<SchedulerError> for FluxError {
    fn from(error: SchedulerError) -> Self {
        let scheduler = error.scheduler().to_string();
        FluxError::rejected(scheduler, error.to_string())
    }
}
