//! Clock Types
//!
//! Instants are `Duration`s measured from the clock's own origin, which keeps
//! virtual and wall clocks interchangeable: a virtual clock starts at zero and
//! a wall clock starts at its construction instant.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

/// A point in clock time, relative to the clock origin
pub type ClockInstant = Duration;

/// Scheduling sequence number; breaks ties between tasks due at the same instant
pub type TaskId = u64;

/// Unit of work posted to a clock or scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task
///
/// The task body lives in a slot shared with the clock queue. Cancelling
/// empties the slot, so whatever the task captured is released right away
/// even though the queue entry stays until its instant comes up.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    slot: Arc<TaskSlot>,
}

struct TaskSlot {
    cancelled: AtomicBool,
    task: Mutex<Option<Task>>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, task: Task) -> Self {
        Self {
            id,
            slot: Arc::new(TaskSlot {
                cancelled: AtomicBool::new(false),
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Sequence number of the task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Prevent the task from running if it has not fired yet and drop it
    pub fn cancel(&self) {
        self.slot.cancelled.store(true, AtomicOrdering::Release);
        let task = self.slot.task.lock().take();
        drop(task);
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(AtomicOrdering::Acquire)
    }

    /// Take the task body for running; `None` once cancelled or taken
    pub(crate) fn take_task(&self) -> Option<Task> {
        if self.is_cancelled() {
            return None;
        }
        self.slot.task.lock().take()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Task waiting in a clock queue
pub(crate) struct ScheduledTask {
    /// When the task should fire
    pub fire_at: ClockInstant,
    /// Scheduling order, used for ties
    pub id: TaskId,
    /// Shares the task body with the handle returned to the caller
    pub handle: TaskHandle,
}

impl ScheduledTask {
    pub(crate) fn new(fire_at: ClockInstant, id: TaskId, task: Task) -> (Self, TaskHandle) {
        let handle = TaskHandle::new(id, task);
        let scheduled = Self {
            fire_at,
            id,
            handle: handle.clone(),
        };
        (scheduled, handle)
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reversed ordering so `BinaryHeap` pops the earliest task first
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.fire_at.cmp(&self.fire_at) {
            Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}
