//! Error-recovery operators

use super::context::Context;
use super::emitter::{Emitter, Forward};
use super::{Flux, Subscriber};
use crate::domain::error::FluxError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

impl<T: Send + 'static> Flux<T> {
    /// Replace an error with `value`, then complete
    pub fn on_error_return(&self, value: T) -> Flux<T>
    where
        T: Clone + Sync,
    {
        self.lift(move |downstream, _| ReturnSubscriber {
            downstream,
            fallback: value.clone(),
        })
    }

    /// Replace an error with the sequence `f(error)`
    ///
    /// Values emitted before the error are kept; the fallback is relayed
    /// after them on the same downstream.
    pub fn on_error_resume<F>(&self, f: F) -> Flux<T>
    where
        F: Fn(FluxError) -> Flux<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |downstream, _| ResumeSubscriber {
            downstream,
            fallback: Arc::clone(&f),
        })
    }

    /// Resubscribe up to `retries` more times after an error
    ///
    /// Every attempt replays the sequence from scratch, so values emitted
    /// before the error are emitted again. Once the attempts are used up,
    /// the last error is propagated.
    pub fn retry(&self, retries: u64) -> Flux<T> {
        let source = self.clone();
        Flux::from_fn(move |downstream: Emitter<T>| {
            let shared = Arc::new(RetryShared {
                source: source.clone(),
                remaining: AtomicU64::new(retries),
                wip: AtomicUsize::new(0),
                downstream,
            });
            shared.resubscribe();
        })
    }
}

struct ReturnSubscriber<T> {
    downstream: Emitter<T>,
    fallback: T,
}

impl<T: Clone + Send + Sync + 'static> Subscriber<T> for ReturnSubscriber<T> {
    fn on_next(&self, value: T) {
        self.downstream.next(value);
    }

    fn on_error(&self, error: FluxError) {
        debug!(code = error.code(), error = %error, "error replaced by fallback value");
        self.downstream.next(self.fallback.clone());
        self.downstream.complete();
    }

    fn on_complete(&self) {
        self.downstream.complete();
    }
}

struct ResumeSubscriber<T, F> {
    downstream: Emitter<T>,
    fallback: Arc<F>,
}

impl<T, F> Subscriber<T> for ResumeSubscriber<T, F>
where
    T: Send + 'static,
    F: Fn(FluxError) -> Flux<T> + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        self.downstream.next(value);
    }

    fn on_error(&self, error: FluxError) {
        if self.downstream.is_closed() {
            return;
        }
        debug!(code = error.code(), error = %error, "resuming with fallback sequence");
        let fallback = (self.fallback)(error);
        fallback.subscribe_child(
            Forward::new(self.downstream.clone()),
            self.downstream.subscription().child(),
            self.downstream.context().clone(),
        );
    }

    fn on_complete(&self) {
        self.downstream.complete();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Same trampoline as concat: a source failing synchronously during
// `resubscribe` bumps `wip` and the running loop starts the next attempt.

struct RetryShared<T> {
    source: Flux<T>,
    remaining: AtomicU64,
    wip: AtomicUsize,
    downstream: Emitter<T>,
}

impl<T: Send + 'static> RetryShared<T> {
    fn resubscribe(self: &Arc<Self>) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        loop {
            if self.downstream.is_closed() {
                return;
            }
            self.source.subscribe_child(
                RetryInner {
                    shared: Arc::clone(self),
                },
                self.downstream.subscription().child(),
                self.context().clone(),
            );
            if self.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        }
    }

    fn context(&self) -> &Context {
        self.downstream.context()
    }

    /// Consume one retry; false once exhausted
    fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }
}

struct RetryInner<T> {
    shared: Arc<RetryShared<T>>,
}

impl<T: Send + 'static> Subscriber<T> for RetryInner<T> {
    fn on_next(&self, value: T) {
        self.shared.downstream.next(value);
    }

    fn on_error(&self, error: FluxError) {
        if self.shared.try_consume() {
            debug!(
                remaining = self.shared.remaining.load(Ordering::Acquire),
                error = %error,
                "retrying after error"
            );
            self.shared.resubscribe();
        } else {
            self.shared.downstream.error(error);
        }
    }

    fn on_complete(&self) {
        self.shared.downstream.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::{Clock, VirtualClock};
    use crate::domain::error::ErrorKind;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(1);

    fn abc_then_error() -> Flux<&'static str> {
        Flux::just(["A", "B", "C"]).concat_with(&Flux::error(FluxError::msg("boom")))
    }

    #[test]
    fn test_on_error_return() {
        let got = abc_then_error().on_error_return("X").block_collect(WAIT).unwrap();
        assert_eq!(got, vec!["A", "B", "C", "X"]);
    }

    #[test]
    fn test_on_error_resume_relays_fallback() {
        let got = abc_then_error()
            .on_error_resume(|_| Flux::just(["Y", "Z"]))
            .block_collect(WAIT)
            .unwrap();
        assert_eq!(got, vec!["A", "B", "C", "Y", "Z"]);
    }

    #[test]
    fn test_retry_replays_then_fails() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let failure = Arc::new(parking_lot::Mutex::new(None));
        let failure_sink = Arc::clone(&failure);

        abc_then_error().retry(1).subscribe_all(
            move |v| sink.lock().push(v),
            move |e| *failure_sink.lock() = Some(e),
            || {},
        );

        assert_eq!(*seen.lock(), vec!["A", "B", "C", "A", "B", "C"]);
        let failure = failure.lock().take().unwrap();
        assert_eq!(failure.kind(), ErrorKind::SourceFailure);
    }

    struct CountValues(Arc<AtomicUsize>);

    impl Subscriber<u64> for CountValues {
        fn on_next(&self, _value: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: FluxError) {}

        fn on_complete(&self) {}
    }

    #[test]
    fn test_endless_retry_keeps_hooks_bounded() {
        let clock = Arc::new(VirtualClock::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let flaky = Flux::interval(Duration::from_secs(1))
            .take(1)
            .concat_with(&Flux::error(FluxError::msg("flaky")))
            .retry(u64::MAX);
        let root = flaky.subscribe_in(
            CountValues(Arc::clone(&seen)),
            Context::new(Arc::clone(&clock) as Arc<dyn Clock>),
        );

        for attempt in 1..=1_000 {
            clock.advance_by(Duration::from_secs(1));
            assert!(root.hook_count() <= 1, "attempt {attempt}: {} hooks", root.hook_count());
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1_000);

        root.cancel();
        clock.advance_by(Duration::from_secs(10));
        assert_eq!(seen.load(Ordering::SeqCst), 1_000);
    }

    #[test]
    fn test_retry_zero_propagates_immediately() {
        let err = Flux::<i32>::error(FluxError::msg("once")).retry(0).block_collect(WAIT).unwrap_err();
        assert!(err.to_string().contains("once"));
    }

    #[test]
    fn test_retry_many_synchronous_failures() {
        let err = Flux::<i32>::error(FluxError::msg("again"))
            .retry(50_000)
            .block_collect(WAIT)
            .unwrap_err();
        assert!(err.to_string().contains("again"));
    }
}
