//! Worker Pool - crossbeam-backed worker threads
//!
//! # Design
//!
//! Every worker owns an unbounded crossbeam channel and drains it in FIFO
//! order, so tasks posted to one worker run in submission order. The pool
//! keeps only the senders; dropping them disconnects the channels and lets
//! each worker finish its queue and exit.
//!
//! ```text
//! WorkerPool
//!   └─ senders: RwLock<Vec<Sender<Task>>>
//!        ├─ [0] ──► thread "name-0"  (rx.iter())
//!        ├─ [1] ──► thread "name-1"
//!        └─ ...
//! ```

use super::types::SchedulerError;
use crate::domain::clock::Task;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, error, trace};

pub(crate) struct WorkerPool {
    name: String,
    senders: RwLock<Vec<Sender<Task>>>,
    spawn_error: Option<SchedulerError>,
}

impl WorkerPool {
    /// Start `size` workers; single-worker pools use `name` as the thread name
    pub(crate) fn start(name: &str, size: usize) -> Self {
        let mut senders = Vec::with_capacity(size);
        let mut spawn_error = None;

        for index in 0..size {
            let thread_name = if size == 1 {
                name.to_string()
            } else {
                format!("{name}-{index}")
            };
            let (tx, rx) = unbounded::<Task>();
            let spawned = thread::Builder::new().name(thread_name.clone()).spawn(move || {
                for task in rx.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(worker = %thread_name, "scheduled task panicked");
                    }
                }
                trace!(worker = %thread_name, "worker exited");
            });

            match spawned {
                Ok(_) => senders.push(tx),
                Err(err) => {
                    error!(scheduler = %name, index, error = %err, "failed to start worker");
                    spawn_error = Some(SchedulerError::SpawnFailed {
                        name: name.to_string(),
                        index,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        debug!(scheduler = %name, workers = senders.len(), "worker pool started");
        Self {
            name: name.to_string(),
            senders: RwLock::new(senders),
            spawn_error,
        }
    }

    /// Number of live workers
    pub(crate) fn len(&self) -> usize {
        self.senders.read().len()
    }

    /// Post `task` to worker `index`
    pub(crate) fn submit(&self, index: usize, task: Task) -> Result<(), SchedulerError> {
        if let Some(err) = &self.spawn_error {
            return Err(err.clone());
        }
        let senders = self.senders.read();
        if senders.is_empty() {
            return Err(SchedulerError::Disposed {
                name: self.name.clone(),
            });
        }
        let sender = senders
            .get(index % senders.len())
            .ok_or_else(|| SchedulerError::WorkerUnavailable {
                name: self.name.clone(),
                index,
            })?;
        sender.send(task).map_err(|_| SchedulerError::WorkerUnavailable {
            name: self.name.clone(),
            index,
        })
    }

    /// Disconnect every worker; queued tasks still run
    pub(crate) fn shutdown(&self) {
        self.senders.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_single_worker_runs_in_order_on_named_thread() {
        let pool = WorkerPool::start("pool-test", 1);
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            pool.submit(
                0,
                Box::new(move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send((i, name)).unwrap();
                }),
            )
            .unwrap();
        }

        let got: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(got.iter().all(|(_, name)| name.as_deref() == Some("pool-test")));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::start("pool-panic", 1);
        let (tx, rx) = mpsc::channel();

        pool.submit(0, Box::new(|| panic!("boom"))).unwrap();
        pool.submit(0, Box::new(move || tx.send(()).unwrap())).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_shutdown_rejects_submissions() {
        let pool = WorkerPool::start("pool-down", 2);
        assert_eq!(pool.len(), 2);
        pool.shutdown();

        let err = pool.submit(0, Box::new(|| {})).unwrap_err();
        assert!(matches!(err, SchedulerError::Disposed { .. }));
    }
}
