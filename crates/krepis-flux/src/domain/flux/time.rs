//! Time and execution-context operators
//!
//! Delays are measured on the subscription's clock, so the same pipeline
//! runs in wall time or virtual time. Under a virtual clock, `publish_on`
//! and `subscribe_on` hop through the clock at the current instant instead
//! of a worker thread, which keeps verification single-threaded and
//! deterministic.

use super::emitter::{Emitter, Forward};
use super::{Flux, Subscriber};
use crate::domain::clock::{Clock, TaskHandle};
use crate::domain::error::FluxError;
use crate::domain::scheduler::{Scheduler, Worker};
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

impl<T: Send + 'static> Flux<T> {
    /// Delay every value by `delay`, preserving order
    ///
    /// A value is held for `delay` once every earlier value was emitted, so
    /// consecutive values are at least `delay` apart. Completion waits for
    /// the last delayed value; an error is delivered immediately.
    pub fn delay_elements(&self, delay: Duration) -> Flux<T> {
        let upstream = self.clone();
        Flux::from_fn(move |downstream: Emitter<T>| {
            let subscription = downstream.subscription().child();
            let context = downstream.context().clone();
            let cleanup = downstream.subscription().clone();
            let shared = Arc::new(DelayShared {
                downstream,
                upstream: subscription.clone(),
                delay,
                state: Mutex::new(DelayState {
                    queue: VecDeque::new(),
                    busy: false,
                    completed: false,
                    timer: None,
                }),
            });
            // Upstream may finish while values still wait; the timer belongs
            // to the downstream side.
            let on_cancel = Arc::clone(&shared);
            cleanup.on_cancel(move || on_cancel.cancel_timer());
            upstream.subscribe_child(DelaySubscriber { shared }, subscription, context);
        })
    }

    /// Subscribe upstream only after `delay`
    pub fn delay_subscription(&self, delay: Duration) -> Flux<T> {
        let upstream = self.clone();
        Flux::from_fn(move |downstream: Emitter<T>| {
            let subscription = downstream.subscription().child();
            let context = downstream.context().clone();
            let clock = Arc::clone(context.clock());
            let source = upstream.clone();
            let target = downstream.clone();
            let child = subscription.clone();
            let scheduled = clock.schedule(
                delay,
                Box::new(move || source.subscribe_child(Forward::new(target), child, context)),
            );
            match scheduled {
                Ok(handle) => subscription.on_cancel(move || handle.cancel()),
                Err(error) => downstream.error(error),
            }
        })
    }

    /// Deliver every downstream signal on `scheduler`
    ///
    /// All signals of one subscription go to a single pinned worker, so
    /// their order is preserved. A rejected hand-off cancels upstream and
    /// fails the sequence.
    pub fn publish_on(&self, scheduler: &Scheduler) -> Flux<T> {
        let scheduler = scheduler.clone();
        self.lift(move |downstream: Emitter<T>, upstream: Subscription| {
            let target = if downstream.context().is_virtual() {
                Target::Clock(Arc::clone(downstream.context().clock()))
            } else {
                Target::Worker(scheduler.create_worker())
            };
            PublishOnSubscriber {
                downstream,
                upstream,
                target,
            }
        })
    }

    /// Run the subscription itself on `scheduler`
    ///
    /// Signals stay on whatever thread upstream emits them from.
    pub fn subscribe_on(&self, scheduler: &Scheduler) -> Flux<T> {
        let upstream = self.clone();
        let scheduler = scheduler.clone();
        Flux::from_fn(move |downstream: Emitter<T>| {
            let subscription = downstream.subscription().child();
            let context = downstream.context().clone();
            let target = if context.is_virtual() {
                Target::Clock(Arc::clone(context.clock()))
            } else {
                Target::Worker(scheduler.create_worker())
            };
            let source = upstream.clone();
            let forward = Forward::new(downstream.clone());
            let dispatched = target.dispatch(move || source.subscribe_child(forward, subscription, context));
            if let Err(error) = dispatched {
                downstream.error(error);
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// delay_elements
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// At most one timer is pending: `busy` is set while the head of the queue
// waits for its delay. Downstream signals are sent from timer callbacks only
// after the state lock is released.

struct DelayShared<T> {
    downstream: Emitter<T>,
    upstream: Subscription,
    delay: Duration,
    state: Mutex<DelayState<T>>,
}

struct DelayState<T> {
    queue: VecDeque<T>,
    busy: bool,
    completed: bool,
    timer: Option<TaskHandle>,
}

impl<T: Send + 'static> DelayShared<T> {
    fn cancel_timer(&self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.cancel();
        }
    }

    /// Start the timer for the queue head; call under the state lock
    fn arm(self: &Arc<Self>, state: &mut DelayState<T>) -> Result<(), FluxError> {
        state.busy = true;
        let owner = Arc::clone(self);
        let handle = self
            .downstream
            .context()
            .clock()
            .schedule(self.delay, Box::new(move || owner.on_timer()))?;
        state.timer = Some(handle);
        Ok(())
    }

    /// Emit the queue head, then arm the next timer or finish
    ///
    /// `busy` stays set while the head is delivered, so the next timer is
    /// only armed after the previous value reached downstream.
    fn on_timer(self: &Arc<Self>) {
        let head = {
            let mut state = self.state.lock();
            state.timer = None;
            state.queue.pop_front()
        };
        if let Some(value) = head {
            self.downstream.next(value);
        }
        let terminal = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                state.busy = false;
                state.completed.then_some(Signal::Complete)
            } else {
                match self.arm(&mut state) {
                    Ok(()) => None,
                    Err(error) => {
                        state.queue.clear();
                        self.upstream.cancel();
                        Some(Signal::Error(error))
                    }
                }
            }
        };
        if let Some(signal) = terminal {
            self.downstream.deliver(signal);
        }
    }
}

struct DelaySubscriber<T> {
    shared: Arc<DelayShared<T>>,
}

impl<T: Send + 'static> Subscriber<T> for DelaySubscriber<T> {
    fn on_next(&self, value: T) {
        let failure = {
            let mut state = self.shared.state.lock();
            state.queue.push_back(value);
            if state.busy {
                None
            } else {
                self.shared.arm(&mut state).err()
            }
        };
        if let Some(error) = failure {
            self.shared.upstream.cancel();
            self.shared.downstream.error(error);
        }
    }

    fn on_error(&self, error: FluxError) {
        {
            let mut state = self.shared.state.lock();
            state.queue.clear();
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
        }
        self.shared.downstream.error(error);
    }

    fn on_complete(&self) {
        let idle = {
            let mut state = self.shared.state.lock();
            state.completed = true;
            !state.busy
        };
        if idle {
            self.shared.downstream.complete();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// publish_on / subscribe_on
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where hopped work runs
enum Target {
    Worker(Worker),
    Clock(Arc<dyn Clock>),
}

impl Target {
    fn dispatch<F>(&self, task: F) -> Result<(), FluxError>
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Target::Worker(worker) => worker.schedule(task).map_err(FluxError::from),
            Target::Clock(clock) => clock.schedule(Duration::ZERO, Box::new(task)).map(|_| ()),
        }
    }
}

struct PublishOnSubscriber<T> {
    downstream: Emitter<T>,
    upstream: Subscription,
    target: Target,
}

impl<T: Send + 'static> PublishOnSubscriber<T> {
    fn hop(&self, signal: Signal<T>) {
        let downstream = self.downstream.clone();
        if let Err(error) = self.target.dispatch(move || downstream.deliver(signal)) {
            self.upstream.cancel();
            self.downstream.error(error);
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for PublishOnSubscriber<T> {
    fn on_next(&self, value: T) {
        self.hop(Signal::Next(value));
    }

    fn on_error(&self, error: FluxError) {
        self.hop(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.hop(Signal::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::VirtualClock;
    use crate::domain::flux::Context;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(2);

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Subscriber<i64> for Recorder {
        fn on_next(&self, value: i64) {
            self.0.lock().push(value.to_string());
        }
        fn on_error(&self, error: FluxError) {
            self.0.lock().push(format!("error {}", error.kind()));
        }
        fn on_complete(&self) {
            self.0.lock().push("complete".into());
        }
    }

    fn virtual_run(flux: Flux<i64>) -> (Arc<VirtualClock>, Arc<Mutex<Vec<String>>>) {
        let clock = Arc::new(VirtualClock::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        flux.subscribe_in(
            Recorder(Arc::clone(&log)),
            Context::new(Arc::clone(&clock) as Arc<dyn Clock>),
        );
        (clock, log)
    }

    #[test]
    fn test_delay_elements_spaces_values() {
        let (clock, log) = virtual_run(Flux::range(1, 3).delay_elements(Duration::from_secs(1)));
        assert!(log.lock().is_empty());

        clock.advance_by(Duration::from_secs(1));
        assert_eq!(*log.lock(), vec!["1"]);

        clock.advance_by(Duration::from_secs(2));
        assert_eq!(*log.lock(), vec!["1", "2", "3", "complete"]);
    }

    #[test]
    fn test_delay_subscription_defers_upstream() {
        let (clock, log) = virtual_run(Flux::range(0, 2).delay_subscription(Duration::from_secs(5)));
        clock.advance_by_exclusive(Duration::from_secs(5));
        assert!(log.lock().is_empty());
        clock.run_due();
        assert_eq!(*log.lock(), vec!["0", "1", "complete"]);
    }

    #[test]
    fn test_publish_on_single_thread() {
        let scheduler = Scheduler::single("TEST-PUBLISH");
        let threads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&threads);
        let got = Flux::range(0, 5)
            .publish_on(&scheduler)
            .map(move |v| {
                sink.lock().push(thread::current().name().map(str::to_owned));
                v
            })
            .block_collect(WAIT)
            .unwrap();

        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert!(threads
            .lock()
            .iter()
            .all(|name| name.as_deref() == Some("TEST-PUBLISH")));
        scheduler.dispose();
    }

    #[test]
    fn test_publish_on_disposed_scheduler_fails() {
        let scheduler = Scheduler::single("TEST-DISPOSED");
        scheduler.dispose();
        let err = Flux::range(0, 3).publish_on(&scheduler).block_collect(WAIT).unwrap_err();
        assert_eq!(err.kind(), crate::domain::error::ErrorKind::SchedulerRejection);
    }

    #[test]
    fn test_subscribe_on_runs_source_on_worker() {
        let scheduler = Scheduler::single("TEST-SUBSCRIBE");
        let origin = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&origin);
        let got = Flux::from_fn(move |emitter: Emitter<i64>| {
            *sink.lock() = thread::current().name().map(str::to_owned);
            emitter.next(1);
            emitter.complete();
        })
        .subscribe_on(&scheduler)
        .block_collect(WAIT)
        .unwrap();

        assert_eq!(got, vec![1]);
        assert_eq!(origin.lock().as_deref(), Some("TEST-SUBSCRIBE"));
        scheduler.dispose();
    }
}
