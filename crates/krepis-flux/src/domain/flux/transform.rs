//! Element-wise operators

use super::emitter::{Emitter, Relay, Serializer};
use super::{Flux, Subscriber};
use crate::domain::error::FluxError;
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

impl<T: Send + 'static> Flux<T> {
    /// Transform every value
    pub fn map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |downstream, upstream| {
            let f = Arc::clone(&f);
            Relay::new(downstream, upstream, move |down: &Emitter<U>, _: &Subscription, value: T| {
                down.next(f(value));
            })
        })
    }

    /// Transform every value with a fallible function
    ///
    /// The first `Err` cancels upstream and terminates the sequence with it.
    pub fn try_map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, FluxError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |downstream, upstream| {
            let f = Arc::clone(&f);
            Relay::new(downstream, upstream, move |down: &Emitter<U>, up: &Subscription, value: T| {
                match f(value) {
                    Ok(mapped) => down.next(mapped),
                    Err(error) => {
                        up.cancel();
                        down.error(error);
                    }
                }
            })
        })
    }

    /// Keep values matching `predicate`
    pub fn filter<P>(&self, predicate: P) -> Flux<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move |downstream, upstream| {
            let predicate = Arc::clone(&predicate);
            Relay::new(downstream, upstream, move |down: &Emitter<T>, _: &Subscription, value: T| {
                if predicate(&value) {
                    down.next(value);
                }
            })
        })
    }

    /// Transform and filter in one step
    pub fn filter_map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |downstream, upstream| {
            let f = Arc::clone(&f);
            Relay::new(downstream, upstream, move |down: &Emitter<U>, _: &Subscription, value: T| {
                if let Some(mapped) = f(value) {
                    down.next(mapped);
                }
            })
        })
    }

    /// Drop values already seen on this subscription
    pub fn distinct(&self) -> Flux<T>
    where
        T: Eq + Hash + Clone,
    {
        self.lift(|downstream, upstream| {
            let seen = Mutex::new(HashSet::new());
            Relay::new(downstream, upstream, move |down: &Emitter<T>, _: &Subscription, value: T| {
                let fresh = seen.lock().insert(value.clone());
                if fresh {
                    down.next(value);
                }
            })
        })
    }

    /// Map every value to an inner sequence and merge them all
    ///
    /// Inner sequences run concurrently; values are emitted in arrival
    /// order. The result completes once the outer and every inner sequence
    /// completed; any error cancels everything else.
    pub fn flat_map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let upstream = self.clone();
        Flux::from_fn(move |downstream: Emitter<U>| {
            let group = downstream.subscription().child();
            let context = downstream.context().clone();
            let shared = Arc::new(FlatMapShared {
                serializer: Serializer::new(downstream),
                group: group.clone(),
                active: AtomicUsize::new(1),
            });
            let outer = FlatMapOuter {
                shared,
                f: Arc::clone(&f),
            };
            upstream.subscribe_child(outer, group.child(), context);
        })
    }

    /// Trace every signal at info level under `category`
    pub fn log(&self, category: impl Into<String>) -> Flux<T>
    where
        T: fmt::Debug,
    {
        let category: Arc<str> = Arc::from(category.into());
        self.lift(move |downstream, _| LogSubscriber {
            category: Arc::clone(&category),
            downstream,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// flat_map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FlatMapShared<U> {
    serializer: Serializer<U>,
    group: Subscription,
    /// Outer plus live inner sequences
    active: AtomicUsize,
}

impl<U: Send + 'static> FlatMapShared<U> {
    fn finish_one(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.serializer.emit(Signal::Complete);
        }
    }

    fn fail(&self, error: FluxError) {
        self.group.cancel();
        self.serializer.emit(Signal::Error(error));
    }
}

struct FlatMapOuter<U, F> {
    shared: Arc<FlatMapShared<U>>,
    f: Arc<F>,
}

impl<T, U, F> Subscriber<T> for FlatMapOuter<U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flux<U> + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        if self.shared.group.is_cancelled() {
            return;
        }
        let inner = (self.f)(value);
        self.shared.active.fetch_add(1, Ordering::AcqRel);
        let context = self.shared.serializer.emitter().context().clone();
        inner.subscribe_child(
            FlatMapInner {
                shared: Arc::clone(&self.shared),
            },
            self.shared.group.child(),
            context,
        );
    }

    fn on_error(&self, error: FluxError) {
        self.shared.fail(error);
    }

    fn on_complete(&self) {
        self.shared.finish_one();
    }
}

struct FlatMapInner<U> {
    shared: Arc<FlatMapShared<U>>,
}

impl<U: Send + 'static> Subscriber<U> for FlatMapInner<U> {
    fn on_next(&self, value: U) {
        self.shared.serializer.emit(Signal::Next(value));
    }

    fn on_error(&self, error: FluxError) {
        self.shared.fail(error);
    }

    fn on_complete(&self) {
        self.shared.finish_one();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct LogSubscriber<T> {
    category: Arc<str>,
    downstream: Emitter<T>,
}

impl<T: fmt::Debug + Send + 'static> Subscriber<T> for LogSubscriber<T> {
    fn on_subscribe(&self, subscription: &Subscription) {
        info!(category = %self.category, "subscribed");
        let category = Arc::clone(&self.category);
        subscription.on_cancel(move || info!(category = %category, "released"));
    }

    fn on_next(&self, value: T) {
        info!(category = %self.category, ?value, "next");
        self.downstream.next(value);
    }

    fn on_error(&self, error: FluxError) {
        info!(category = %self.category, code = error.code(), %error, "error");
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        info!(category = %self.category, "complete");
        self.downstream.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn test_map_filter_chain() {
        let got = Flux::range(1, 10)
            .filter(|v| v % 2 == 0)
            .map(|v| v * v)
            .block_collect(WAIT)
            .unwrap();
        assert_eq!(got, vec![4, 16, 36, 64, 100]);
    }

    #[test]
    fn test_try_map_error_terminates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let err = Flux::range(1, 5)
            .map(move |v| {
                sink.lock().push(v);
                v
            })
            .try_map(|v| {
                if v == 3 {
                    Err(FluxError::msg("three"))
                } else {
                    Ok(v)
                }
            })
            .block_collect(WAIT)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceFailure);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_distinct() {
        let got = Flux::just([1, 2, 1, 3, 2, 4]).distinct().block_collect(WAIT).unwrap();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_flat_map_merges_inner_sequences() {
        let mut got = Flux::range(1, 3)
            .flat_map(|v| Flux::just([v * 10, v * 10 + 1]))
            .block_collect(WAIT)
            .unwrap();
        got.sort_unstable();
        assert_eq!(got, vec![10, 11, 20, 21, 30, 31]);
    }

    #[test]
    fn test_flat_map_inner_error_cancels_outer() {
        let err = Flux::range(1, 100)
            .flat_map(|v| {
                if v == 2 {
                    Flux::error(FluxError::msg("inner"))
                } else {
                    Flux::just([v])
                }
            })
            .block_collect(WAIT)
            .unwrap_err();
        assert!(err.to_string().contains("inner"));
    }

    #[test]
    fn test_log_passes_signals_through() {
        let got = Flux::just(["a", "b"]).log("test").block_collect(WAIT).unwrap();
        assert_eq!(got, vec!["a", "b"]);
    }
}
