//! Production Backend - Wall Clock Timer
//!
//! # Design
//! - `BinaryHeap` of pending tasks, earliest first (O(log n) push/pop)
//! - One dedicated timer thread parks on a `Condvar` until the head task is due
//! - Due tasks run on the timer thread, outside the queue lock
//!
//! Tasks are expected to be short: operators only emit or hand off to a
//! scheduler from inside a timer task.

use super::backend::Clock;
use super::types::{ClockInstant, ScheduledTask, Task, TaskHandle, TaskId};
use crate::domain::error::FluxError;
use parking_lot::{Condvar, Mutex};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;
use tracing::{debug, error};

/// Real-time clock backed by a timer thread
pub struct WallClock {
    name: String,
    origin: Instant,
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

struct TimerState {
    queue: BinaryHeap<ScheduledTask>,
    next_id: TaskId,
    started: bool,
    shutdown: bool,
}

static DEFAULT_CLOCK: OnceLock<Arc<WallClock>> = OnceLock::new();

impl WallClock {
    /// Create a wall clock; its timer thread starts on first use
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: Instant::now(),
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState {
                    queue: BinaryHeap::new(),
                    next_id: 0,
                    started: false,
                    shutdown: false,
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Process-wide default clock used by subscriptions without an explicit context
    pub fn shared() -> Arc<WallClock> {
        Arc::clone(DEFAULT_CLOCK.get_or_init(|| Arc::new(WallClock::new("krepis-flux-timer"))))
    }

    /// Number of tasks waiting to fire
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Stop the timer thread and reject further scheduling
    ///
    /// Pending tasks are dropped without running.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.queue.clear();
        self.shared.wakeup.notify_all();
        debug!(clock = %self.name, "wall clock shut down");
    }

    fn start_timer(&self, state: &mut TimerState) -> Result<(), FluxError> {
        let shared = Arc::clone(&self.shared);
        let origin = self.origin;
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_timer(&shared, origin))
            .map_err(|err| FluxError::rejected(&self.name, format!("timer thread failed to start: {err}")))?;
        state.started = true;
        debug!(clock = %self.name, "timer thread started");
        Ok(())
    }
}

impl Clock for WallClock {
    fn now(&self) -> ClockInstant {
        self.origin.elapsed()
    }

    fn schedule_at(&self, at: ClockInstant, task: Task) -> Result<TaskHandle, FluxError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(FluxError::rejected(&self.name, "clock is shut down"));
        }
        if !state.started {
            self.start_timer(&mut state)?;
        }

        let id = state.next_id;
        state.next_id += 1;
        let (scheduled, handle) = ScheduledTask::new(at, id, task);
        state.queue.push(scheduled);
        self.shared.wakeup.notify_one();
        Ok(handle)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WallClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer(shared: &Shared, origin: Instant) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let Some(head) = state.queue.peek() else {
            shared.wakeup.wait(&mut state);
            continue;
        };

        let now = origin.elapsed();
        if head.fire_at > now {
            let wait = head.fire_at - now;
            shared.wakeup.wait_for(&mut state, wait);
            continue;
        }

        let Some(due) = state.queue.pop() else {
            continue;
        };
        let Some(task) = due.handle.take_task() else {
            continue;
        };

        drop(state);
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(task = due.id, "timer task panicked");
        }
        state = shared.state.lock();
    }
}
