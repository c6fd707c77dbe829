//! Truncating operators

use super::emitter::{Emitter, Relay, Serializer};
use super::{Flux, Subscriber};
use crate::domain::error::FluxError;
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

impl<T: Send + 'static> Flux<T> {
    /// First `n` values, then cancel upstream and complete
    pub fn take(&self, n: u64) -> Flux<T> {
        self.lift(move |downstream: Emitter<T>, upstream: Subscription| {
            if n == 0 {
                upstream.cancel();
                downstream.complete();
            }
            let seen = AtomicU64::new(0);
            Relay::new(downstream, upstream, move |down: &Emitter<T>, up: &Subscription, value: T| {
                let count = seen.fetch_add(1, Ordering::AcqRel) + 1;
                if count > n {
                    return;
                }
                down.next(value);
                if count == n {
                    up.cancel();
                    down.complete();
                }
            })
        })
    }

    /// Last `n` values, emitted once upstream completes
    pub fn take_last(&self, n: usize) -> Flux<T> {
        self.lift(move |downstream, _| TakeLastSubscriber {
            downstream,
            capacity: n,
            window: Mutex::new(VecDeque::with_capacity(n)),
        })
    }

    /// Values while `predicate` holds; the first failing value is dropped
    /// and the sequence completes
    pub fn take_while<P>(&self, predicate: P) -> Flux<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move |downstream, upstream| {
            let predicate = Arc::clone(&predicate);
            Relay::new(downstream, upstream, move |down: &Emitter<T>, up: &Subscription, value: T| {
                if predicate(&value) {
                    down.next(value);
                } else {
                    up.cancel();
                    down.complete();
                }
            })
        })
    }

    /// Values up to and including the first one matching `predicate`
    pub fn take_until<P>(&self, predicate: P) -> Flux<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move |downstream, upstream| {
            let predicate = Arc::clone(&predicate);
            Relay::new(downstream, upstream, move |down: &Emitter<T>, up: &Subscription, value: T| {
                let stop = predicate(&value);
                down.next(value);
                if stop {
                    up.cancel();
                    down.complete();
                }
            })
        })
    }

    /// Values until `other` emits its first value or completes
    ///
    /// `other` is subscribed first, so an `other` that signals synchronously
    /// truncates before any value. An error from `other` fails the result;
    /// an `other` that never signals never truncates.
    pub fn take_until_other<U: Send + 'static>(&self, other: &Flux<U>) -> Flux<T> {
        let upstream = self.clone();
        let other = other.clone();
        Flux::from_fn(move |downstream: Emitter<T>| {
            let main = downstream.subscription().child();
            let trigger = downstream.subscription().child();
            let context = downstream.context().clone();
            let serializer = Arc::new(Serializer::new(downstream));

            other.subscribe_child(
                UntilTrigger {
                    serializer: Arc::clone(&serializer),
                    main: main.clone(),
                    trigger: trigger.clone(),
                },
                trigger.clone(),
                context.clone(),
            );
            upstream.subscribe_child(
                UntilMain {
                    serializer,
                    trigger,
                },
                main,
                context,
            );
        })
    }
}

struct TakeLastSubscriber<T> {
    downstream: Emitter<T>,
    capacity: usize,
    window: Mutex<VecDeque<T>>,
}

impl<T: Send + 'static> Subscriber<T> for TakeLastSubscriber<T> {
    fn on_next(&self, value: T) {
        if self.capacity == 0 {
            return;
        }
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(value);
    }

    fn on_error(&self, error: FluxError) {
        self.window.lock().clear();
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        let window = std::mem::take(&mut *self.window.lock());
        for value in window {
            self.downstream.next(value);
        }
        self.downstream.complete();
    }
}

struct UntilMain<T> {
    serializer: Arc<Serializer<T>>,
    trigger: Subscription,
}

impl<T: Send + 'static> Subscriber<T> for UntilMain<T> {
    fn on_next(&self, value: T) {
        self.serializer.emit(Signal::Next(value));
    }

    fn on_error(&self, error: FluxError) {
        self.trigger.cancel();
        self.serializer.emit(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.trigger.cancel();
        self.serializer.emit(Signal::Complete);
    }
}

struct UntilTrigger<T> {
    serializer: Arc<Serializer<T>>,
    main: Subscription,
    trigger: Subscription,
}

impl<T: Send + 'static> UntilTrigger<T> {
    fn fire(&self) {
        self.main.cancel();
        self.trigger.cancel();
        self.serializer.emit(Signal::Complete);
    }
}

impl<T: Send + 'static, U> Subscriber<U> for UntilTrigger<T> {
    fn on_next(&self, _value: U) {
        self.fire();
    }

    fn on_error(&self, error: FluxError) {
        self.main.cancel();
        self.serializer.emit(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.fire();
    }
}
