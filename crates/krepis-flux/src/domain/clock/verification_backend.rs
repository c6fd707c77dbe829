//! Verification Backend - Virtual Clock
//!
//! Time only moves when a driver (normally the step verifier) advances it.
//! Advancing fires every task that falls due, in `(fire_at, id)` order, with
//! `now` set to the task's instant while it runs. Tasks scheduled by a firing
//! task are picked up by the same advance when they fall inside its window,
//! so a delay chain of any length resolves in a single call.
//!
//! # Memory Layout
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ VirtualClock                                │
//! ├─────────────────────────────────────────────┤
//! │ state: Mutex<VirtualState>                  │
//! │   ├─ now: ClockInstant                      │
//! │   ├─ next_id: TaskId                        │
//! │   └─ queue: BinaryHeap<ScheduledTask>       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The lock is never held while a task runs.

use super::backend::Clock;
use super::types::{ClockInstant, ScheduledTask, Task, TaskHandle, TaskId};
use crate::domain::error::FluxError;
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::{trace, warn};

/// Upper bound on tasks fired by one advance
///
/// Guards against a task that keeps rescheduling itself at the current
/// instant.
const MAX_TASKS_PER_ADVANCE: usize = 1_000_000;

/// Manually driven clock
pub struct VirtualClock {
    state: Mutex<VirtualState>,
}

struct VirtualState {
    now: ClockInstant,
    next_id: TaskId,
    queue: BinaryHeap<ScheduledTask>,
}

/// Which tasks at the target instant an advance fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// Fire tasks due at or before the target
    Inclusive,
    /// Fire tasks due strictly before the target
    Exclusive,
}

impl VirtualClock {
    /// Create a virtual clock at instant zero
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VirtualState {
                now: Duration::ZERO,
                next_id: 0,
                queue: BinaryHeap::new(),
            }),
        }
    }

    /// Move time forward by `delta`, firing every task due up to and
    /// including the new instant
    pub fn advance_by(&self, delta: Duration) {
        let target = self.now().saturating_add(delta);
        self.advance_to(target, Boundary::Inclusive);
    }

    /// Move time to `instant` (no-op if it lies in the past), firing every
    /// task due up to and including it
    pub fn advance_time_to(&self, instant: ClockInstant) {
        self.advance_to(instant, Boundary::Inclusive);
    }

    /// Move time forward by `delta`, firing only tasks due strictly before
    /// the new instant
    ///
    /// Tasks due exactly at the new instant stay queued. This is the
    /// advance behind "expect no event for `delta`": an event landing on the
    /// boundary belongs to the next expectation.
    pub fn advance_by_exclusive(&self, delta: Duration) {
        let target = self.now().saturating_add(delta);
        self.advance_to(target, Boundary::Exclusive);
    }

    /// Fire every task already due at the current instant
    pub fn run_due(&self) {
        let now = self.now();
        self.advance_to(now, Boundary::Inclusive);
    }

    /// Number of queued tasks, including cancelled ones not yet discarded
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Instant of the earliest queued task
    pub fn next_due(&self) -> Option<ClockInstant> {
        self.state.lock().queue.peek().map(|task| task.fire_at)
    }

    fn advance_to(&self, target: ClockInstant, boundary: Boundary) {
        let mut fired = 0usize;
        loop {
            let due = {
                let mut state = self.state.lock();
                let ready = state.queue.peek().is_some_and(|head| match boundary {
                    Boundary::Inclusive => head.fire_at <= target,
                    Boundary::Exclusive => head.fire_at < target,
                });
                if !ready {
                    if target > state.now {
                        state.now = target;
                    }
                    break;
                }
                let Some(due) = state.queue.pop() else {
                    break;
                };
                if due.fire_at > state.now {
                    state.now = due.fire_at;
                }
                due
            };

            let Some(task) = due.handle.take_task() else {
                continue;
            };
            trace!(task = due.id, at = ?due.fire_at, "virtual task fired");
            task();

            fired += 1;
            if fired >= MAX_TASKS_PER_ADVANCE {
                warn!(
                    fired,
                    target = ?target,
                    "virtual clock advance stopped early; a task keeps rescheduling itself"
                );
                break;
            }
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> ClockInstant {
        self.state.lock().now
    }

    fn schedule_at(&self, at: ClockInstant, task: Task) -> Result<TaskHandle, FluxError> {
        let mut state = self.state.lock();
        let fire_at = at.max(state.now);
        let id = state.next_id;
        state.next_id += 1;
        let (scheduled, handle) = ScheduledTask::new(fire_at, id, task);
        state.queue.push(scheduled);
        Ok(handle)
    }

    fn is_virtual(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    fn recorder() -> (Arc<PlMutex<Vec<u64>>>, impl Fn(u64) -> Task) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: u64| -> Task {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_time_starts_at_zero_and_only_moves_on_advance() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        assert!(clock.is_virtual());

        clock.advance_by(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_advance_fires_due_tasks_in_order() {
        let clock = VirtualClock::new();
        let (log, task) = recorder();

        clock.schedule(Duration::from_secs(2), task(2)).unwrap();
        clock.schedule(Duration::from_secs(1), task(1)).unwrap();
        clock.schedule(Duration::from_secs(1), task(11)).unwrap();
        clock.schedule(Duration::from_secs(5), task(5)).unwrap();

        clock.advance_by(Duration::from_secs(2));
        assert_eq!(*log.lock(), vec![1, 11, 2]);
        assert_eq!(clock.pending(), 1);
        assert_eq!(clock.next_due(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_exclusive_advance_leaves_boundary_task_queued() {
        let clock = VirtualClock::new();
        let (log, task) = recorder();
        clock.schedule(Duration::from_secs(10), task(10)).unwrap();

        clock.advance_by_exclusive(Duration::from_secs(10));
        assert!(log.lock().is_empty());
        assert_eq!(clock.now(), Duration::from_secs(10));

        clock.run_due();
        assert_eq!(*log.lock(), vec![10]);
    }

    #[test]
    fn test_tasks_scheduled_during_advance_fire_in_same_advance() {
        let clock = Arc::new(VirtualClock::new());
        let (log, task) = recorder();
        let task = Arc::new(task);

        let inner_clock = Arc::clone(&clock);
        let inner_task = Arc::clone(&task);
        clock
            .schedule(
                Duration::from_secs(1),
                Box::new(move || {
                    assert_eq!(inner_clock.now(), Duration::from_secs(1));
                    inner_clock
                        .schedule(Duration::from_secs(1), inner_task(2))
                        .unwrap();
                }),
            )
            .unwrap();

        clock.advance_by(Duration::from_secs(5));
        assert_eq!(*log.lock(), vec![2]);
        assert_eq!(clock.now(), Duration::from_secs(5));
    }

    #[test]
    fn test_past_instant_is_clamped_to_now() {
        let clock = VirtualClock::new();
        clock.advance_by(Duration::from_secs(4));
        let (log, task) = recorder();

        clock.schedule_at(Duration::from_secs(1), task(1)).unwrap();
        assert_eq!(clock.next_due(), Some(Duration::from_secs(4)));
        clock.run_due();
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn test_cancelled_task_is_skipped() {
        let clock = VirtualClock::new();
        let (log, task) = recorder();
        let handle = clock.schedule(Duration::from_secs(1), task(1)).unwrap();
        handle.cancel();

        clock.advance_by(Duration::from_secs(1));
        assert!(log.lock().is_empty());
        assert_eq!(clock.pending(), 0);
    }
}
