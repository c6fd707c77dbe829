//! Clock Abstraction
//!
//! Every time-based operator (`interval`, `buffer_timeout`, delays) asks the
//! clock of its subscription context for "now" and for delayed execution.
//! Nothing in a pipeline sleeps in real time, which is what lets the step
//! verifier swap in [`VirtualClock`](super::VirtualClock) transparently.
//!
//! Unlike the statically dispatched backends elsewhere in krepis, the clock
//! is chosen per subscription at runtime, so it is used as `Arc<dyn Clock>`.

use super::types::{ClockInstant, Task, TaskHandle};
use crate::domain::error::FluxError;
use std::time::Duration;

/// Source of time and delayed execution
pub trait Clock: Send + Sync {
    /// Current instant, relative to the clock origin
    fn now(&self) -> ClockInstant;

    /// Run `task` once the clock reaches `at`
    ///
    /// Tasks due at the same instant run in scheduling order. Instants in
    /// the past run as soon as possible.
    ///
    /// # Errors
    /// `FluxError::SchedulerRejected` when the clock has been shut down.
    fn schedule_at(&self, at: ClockInstant, task: Task) -> Result<TaskHandle, FluxError>;

    /// Run `task` after `delay`
    ///
    /// # Errors
    /// See [`schedule_at`](Self::schedule_at).
    fn schedule(&self, delay: Duration, task: Task) -> Result<TaskHandle, FluxError> {
        self.schedule_at(self.now().saturating_add(delay), task)
    }

    /// Whether time only moves when a driver advances it
    fn is_virtual(&self) -> bool {
        false
    }

    /// Name used in logs and rejection errors
    fn name(&self) -> &str;
}
