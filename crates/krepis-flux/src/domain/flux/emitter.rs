//! Downstream handles
//!
//! [`Emitter`] is the capability a producer holds to push signals into one
//! subscriber. It enforces the delivery contract: zero or more `next`, then
//! at most one terminal signal, and nothing once the subscription is
//! cancelled. Once the terminal signal is delivered the emitter cancels its
//! subscription, releasing upstream resources and the parent's hook.
//!
//! It does not serialize concurrent callers; producers with more than one
//! thread of signals go through a [`Serializer`].

use super::context::Context;
use super::Subscriber;
use crate::domain::error::FluxError;
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Push handle into one subscriber
pub struct Emitter<T> {
    inner: Arc<EmitterInner<T>>,
}

struct EmitterInner<T> {
    subscriber: Box<dyn Subscriber<T>>,
    subscription: Subscription,
    done: AtomicBool,
    context: Context,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Emitter<T> {
    pub(crate) fn new<S>(subscriber: S, subscription: Subscription, context: Context) -> Self
    where
        S: Subscriber<T>,
    {
        Self {
            inner: Arc::new(EmitterInner {
                subscriber: Box::new(subscriber),
                subscription,
                done: AtomicBool::new(false),
                context,
            }),
        }
    }

    /// Deliver a value; dropped once the subscription is closed
    pub fn next(&self, value: T) {
        if self.is_closed() {
            return;
        }
        self.inner.subscriber.on_next(value);
    }

    /// Terminate with `error`
    ///
    /// An error arriving after termination or cancellation has nowhere to
    /// go; it is logged at debug level and discarded.
    pub fn error(&self, error: FluxError) {
        if !self.terminate() {
            debug!(code = error.code(), error = %error, "error after termination dropped");
            return;
        }
        self.inner.subscriber.on_error(error);
        self.inner.subscription.cancel();
    }

    /// Terminate normally
    pub fn complete(&self) {
        if !self.terminate() {
            return;
        }
        self.inner.subscriber.on_complete();
        self.inner.subscription.cancel();
    }

    /// Deliver an arbitrary signal
    pub fn deliver(&self, signal: Signal<T>) {
        match signal {
            Signal::Next(value) => self.next(value),
            Signal::Complete => self.complete(),
            Signal::Error(error) => self.error(error),
        }
    }

    /// Whether a terminal signal was sent or the subscription cancelled
    pub fn is_closed(&self) -> bool {
        self.inner.done.load(Ordering::Acquire) || self.inner.subscription.is_cancelled()
    }

    /// Subscription this emitter feeds
    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    /// Context of the subscription
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    fn terminate(&self) -> bool {
        if self.inner.subscription.is_cancelled() {
            return false;
        }
        !self.inner.done.swap(true, Ordering::AcqRel)
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("done", &self.inner.done.load(Ordering::Acquire))
            .field("subscription", &self.inner.subscription)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serializer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Queue-drain: any thread may enqueue, exactly one thread drains at a time.
// Combinators enqueue while holding their own state lock (which fixes the
// order of signals) and drain after releasing it (so the downstream never
// runs under a combinator lock). A reentrant drain from the downstream sees
// the draining flag and returns; the outer loop picks up its signals.

pub(crate) struct Serializer<T> {
    emitter: Emitter<T>,
    state: Mutex<DrainState<T>>,
}

struct DrainState<T> {
    queue: VecDeque<Signal<T>>,
    draining: bool,
}

impl<T: Send + 'static> Serializer<T> {
    pub(crate) fn new(emitter: Emitter<T>) -> Self {
        Self {
            emitter,
            state: Mutex::new(DrainState {
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub(crate) fn emitter(&self) -> &Emitter<T> {
        &self.emitter
    }

    pub(crate) fn enqueue(&self, signal: Signal<T>) {
        self.state.lock().queue.push_back(signal);
    }

    pub(crate) fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let signal = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(signal) => signal,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            self.emitter.deliver(signal);
        }
    }

    pub(crate) fn emit(&self, signal: Signal<T>) {
        self.enqueue(signal);
        self.drain();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay subscribers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Passes every signal through unchanged
pub(crate) struct Forward<T> {
    downstream: Emitter<T>,
}

impl<T> Forward<T> {
    pub(crate) fn new(downstream: Emitter<T>) -> Self {
        Self { downstream }
    }
}

impl<T: Send + 'static> Subscriber<T> for Forward<T> {
    fn on_next(&self, value: T) {
        self.downstream.next(value);
    }

    fn on_error(&self, error: FluxError) {
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        self.downstream.complete();
    }
}

/// Custom `on_next`, terminal signals passed through
///
/// The closure receives the downstream emitter and the upstream
/// subscription, so it can cancel upstream and terminate early.
pub(crate) struct Relay<T, U, F> {
    downstream: Emitter<U>,
    upstream: Subscription,
    on_next: F,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, U, F> Relay<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(&Emitter<U>, &Subscription, T) + Send + Sync + 'static,
{
    pub(crate) fn new(downstream: Emitter<U>, upstream: Subscription, on_next: F) -> Self {
        Self {
            downstream,
            upstream,
            on_next,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, U, F> Subscriber<T> for Relay<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(&Emitter<U>, &Subscription, T) + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        if self.downstream.is_closed() {
            return;
        }
        (self.on_next)(&self.downstream, &self.upstream, value);
    }

    fn on_error(&self, error: FluxError) {
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        self.downstream.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flux::Flux;

    #[derive(Default)]
    struct Collect {
        signals: Mutex<Vec<String>>,
    }

    impl Subscriber<i32> for Collect {
        fn on_next(&self, value: i32) {
            self.signals.lock().push(format!("next {value}"));
        }
        fn on_error(&self, error: FluxError) {
            self.signals.lock().push(format!("error {}", error.kind()));
        }
        fn on_complete(&self) {
            self.signals.lock().push("complete".to_string());
        }
    }

    fn emitter(sink: &Arc<Collect>) -> Emitter<i32> {
        Emitter::new(Arc::clone(sink), Subscription::new(), Context::default())
    }

    #[test]
    fn test_only_one_terminal_signal() {
        let sink = Arc::new(Collect::default());
        let emitter = emitter(&sink);

        emitter.next(1);
        emitter.complete();
        emitter.next(2);
        emitter.error(FluxError::msg("late"));
        emitter.complete();

        assert_eq!(*sink.signals.lock(), vec!["next 1", "complete"]);
        assert!(emitter.is_closed());
    }

    #[test]
    fn test_terminal_signal_releases_subscription() {
        let sink = Arc::new(Collect::default());
        let parent = Subscription::new();
        let subscription = parent.child();
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        subscription.on_cancel(move || flag.store(true, Ordering::SeqCst));

        let emitter = Emitter::new(Arc::clone(&sink), subscription, Context::default());
        assert_eq!(parent.hook_count(), 1);
        emitter.error(FluxError::msg("done"));

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(parent.hook_count(), 0);
        assert!(!parent.is_cancelled());
        assert_eq!(*sink.signals.lock(), vec!["error SourceFailure"]);
    }

    #[test]
    fn test_nothing_after_cancel() {
        let sink = Arc::new(Collect::default());
        let emitter = emitter(&sink);

        emitter.subscription().cancel();
        emitter.next(1);
        emitter.complete();

        assert!(sink.signals.lock().is_empty());
    }

    #[test]
    fn test_serializer_handles_reentrant_emission() {
        let sink = Arc::new(Collect::default());
        let serializer = Arc::new(Serializer::new(emitter(&sink)));

        serializer.enqueue(Signal::Next(1));
        serializer.enqueue(Signal::Next(2));
        serializer.drain();
        serializer.emit(Signal::Complete);

        assert_eq!(*sink.signals.lock(), vec!["next 1", "next 2", "complete"]);
    }

    #[test]
    fn test_relay_passes_values_through() {
        let values = Flux::just([1, 2, 3, 4])
            .map(|v| v * 10)
            .block_collect(std::time::Duration::from_secs(1))
            .unwrap();
        assert_eq!(values, vec![10, 20, 30, 40]);
    }
}
