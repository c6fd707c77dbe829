//! Scheduler handle
//!
//! A [`Scheduler`] is a cheap, clonable handle passed by value into
//! operators such as `publish_on`. There is no global registry: whoever
//! creates a scheduler decides its lifetime and calls
//! [`dispose`](Scheduler::dispose) when done.

use super::types::{SchedulerError, SchedulerKind};
use super::worker_pool::WorkerPool;
use crate::domain::clock::Task;
use crate::infrastructure::config::FluxConfig;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Execution context onto which work can be posted
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    kind: SchedulerKind,
    pool: Option<WorkerPool>,
    next_worker: AtomicUsize,
    disposed: AtomicBool,
}

impl Scheduler {
    /// Scheduler that runs every task inline on the submitting thread
    pub fn immediate() -> Self {
        Self::build("immediate", SchedulerKind::Immediate, 0)
    }

    /// Scheduler backed by one worker thread named `name`
    pub fn single(name: impl Into<String>) -> Self {
        Self::build(name, SchedulerKind::Single, 1)
    }

    /// Scheduler backed by `workers` threads named `name-0`, `name-1`, ...
    ///
    /// A size of zero is raised to one.
    pub fn pooled(name: impl Into<String>, workers: usize) -> Self {
        Self::build(name, SchedulerKind::Pooled, workers.max(1))
    }

    /// Pooled scheduler sized to the available hardware parallelism
    pub fn parallel(name: impl Into<String>) -> Self {
        let workers = thread::available_parallelism().map_or(1, usize::from);
        Self::build(name, SchedulerKind::Parallel, workers)
    }

    /// Pooled scheduler using the worker count and thread prefix of `config`
    pub fn from_config(config: &FluxConfig) -> Self {
        Self::pooled(config.thread_name_prefix.clone(), config.pool_size)
    }

    fn build(name: impl Into<String>, kind: SchedulerKind, workers: usize) -> Self {
        let name = name.into();
        let pool = kind.is_threaded().then(|| WorkerPool::start(&name, workers));
        debug!(scheduler = %name, %kind, workers, "scheduler created");
        Self {
            inner: Arc::new(Inner {
                name,
                kind,
                pool,
                next_worker: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Scheduler name, also the worker thread name (prefix)
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Flavour of this scheduler
    pub fn kind(&self) -> SchedulerKind {
        self.inner.kind
    }

    /// Number of worker threads (zero for immediate)
    pub fn worker_count(&self) -> usize {
        self.inner.pool.as_ref().map_or(0, WorkerPool::len)
    }

    /// Run `task` on the next worker, round-robin
    ///
    /// # Errors
    /// [`SchedulerError`] when the scheduler is disposed or its worker
    /// threads could not be started.
    pub fn schedule<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let index = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        self.inner.submit(index, Box::new(task))
    }

    /// Pin a worker; every task posted through it runs on the same thread
    /// in submission order
    pub fn create_worker(&self) -> Worker {
        let index = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        Worker {
            inner: Arc::clone(&self.inner),
            index,
        }
    }

    /// Stop accepting work and let the workers exit once their queues drain
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = &self.inner.pool {
            pool.shutdown();
        }
        debug!(scheduler = %self.inner.name, "scheduler disposed");
    }

    /// Whether [`dispose`](Self::dispose) was called
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl Inner {
    fn submit(&self, index: usize, task: Task) -> Result<(), SchedulerError> {
        if self.disposed.load(Ordering::Acquire) {
            warn!(scheduler = %self.name, "task rejected by disposed scheduler");
            return Err(SchedulerError::Disposed {
                name: self.name.clone(),
            });
        }
        match &self.pool {
            None => {
                task();
                Ok(())
            }
            Some(pool) => pool.submit(index, task).inspect_err(|err| {
                warn!(scheduler = %self.name, error = %err, "task rejected");
            }),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Handle pinned to one worker of a [`Scheduler`]
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
    index: usize,
}

impl Worker {
    /// Run `task` on the pinned worker
    ///
    /// # Errors
    /// See [`Scheduler::schedule`].
    pub fn schedule<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit(self.index, Box::new(task))
    }

    /// Name of the owning scheduler
    pub fn scheduler_name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("scheduler", &self.inner.name)
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_immediate_runs_inline() {
        let scheduler = Scheduler::immediate();
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();

        scheduler
            .schedule(move || tx.send(thread::current().id()).unwrap())
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), caller);
        assert_eq!(scheduler.worker_count(), 0);
    }

    #[test]
    fn test_single_uses_named_thread() {
        let scheduler = Scheduler::single("TEST-SINGLE");
        let (tx, rx) = mpsc::channel();

        scheduler
            .schedule(move || {
                tx.send(thread::current().name().map(str::to_string)).unwrap();
            })
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("TEST-SINGLE"));
        scheduler.dispose();
    }

    #[test]
    fn test_pinned_worker_preserves_order() {
        let scheduler = Scheduler::pooled("pinned", 4);
        let worker = scheduler.create_worker();
        let (tx, rx) = mpsc::channel();

        for i in 0..20 {
            let tx = tx.clone();
            worker.schedule(move || tx.send(i).unwrap()).unwrap();
        }

        let got: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, (0..20).collect::<Vec<_>>());
        scheduler.dispose();
    }

    #[test]
    fn test_disposed_scheduler_rejects_work() {
        let scheduler = Scheduler::pooled("disposed", 2);
        let worker = scheduler.create_worker();
        scheduler.dispose();
        scheduler.dispose();

        assert!(scheduler.is_disposed());
        assert!(matches!(
            scheduler.schedule(|| {}),
            Err(SchedulerError::Disposed { .. })
        ));
        assert!(worker.schedule(|| {}).is_err());
    }
}
