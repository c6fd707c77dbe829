//! Flux Module - Push-based Sequences
//!
//! # Overview
//!
//! A [`Flux<T>`] is an immutable, clonable *description* of a sequence. It
//! does nothing until subscribed; every subscription runs the whole
//! pipeline afresh, and operator state lives only inside that execution.
//!
//! ```text
//!  Flux::range(0, 10)  ──►  .buffer(3)  ──►  .map(..)  ──►  Subscriber
//!        │                     │                │
//!   on_subscribe(Emitter)  BufferSubscriber   Relay
//!        │                     │                │
//!   child Subscription ◄── child Subscription ◄── root Subscription
//! ```
//!
//! Signals flow left to right through [`Emitter`]s. Cancellation flows right
//! to left through [`Subscription::child`] links.
//!
//! # Module Structure
//!
//! ```text
//! domain/flux/
//! ├── context.rs    Context (clock of a subscription)
//! ├── emitter.rs    Emitter, Serializer, relay subscribers
//! ├── source.rs     just, range, interval, generate, create, ...
//! ├── transform.rs  map, filter, flat_map, distinct, log
//! ├── buffer.rs     buffer, buffer_timeout
//! ├── take.rs       take, take_last, take_while, take_until*
//! ├── aggregate.rs  reduce, reduce_with, collect_list, sort
//! ├── combine.rs    concat, merge, merge_sequential, zip, combine_latest, first
//! ├── recovery.rs   on_error_return, on_error_resume, retry
//! └── time.rs       delay_elements, delay_subscription, publish_on, subscribe_on
//! ```

mod aggregate;
mod buffer;
mod combine;
mod context;
mod emitter;
mod recovery;
mod source;
mod take;
mod time;
mod transform;

pub use context::Context;
pub use emitter::Emitter;
pub use source::{FluxSink, SynchronousSink};

pub(crate) use emitter::{Forward, Relay, Serializer};

use crate::domain::error::FluxError;
use crate::domain::subscription::{Disposable, Subscription};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscriber
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consumer of one subscription
///
/// Callbacks for one subscription never overlap and arrive in order:
/// `on_subscribe`, any number of `on_next`, then at most one of
/// `on_error` / `on_complete`.
pub trait Subscriber<T>: Send + Sync + 'static {
    /// Called once, before any other signal
    fn on_subscribe(&self, _subscription: &Subscription) {}

    /// A value
    fn on_next(&self, value: T);

    /// Failed termination
    fn on_error(&self, error: FluxError);

    /// Normal termination
    fn on_complete(&self);
}

impl<T, S> Subscriber<T> for Arc<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&self, subscription: &Subscription) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&self, value: T) {
        (**self).on_next(value);
    }

    fn on_error(&self, error: FluxError) {
        (**self).on_error(error);
    }

    fn on_complete(&self) {
        (**self).on_complete();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flux
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type OnSubscribe<T> = dyn Fn(Emitter<T>) + Send + Sync;

/// Reusable description of a push-based sequence
pub struct Flux<T> {
    on_subscribe: Arc<OnSubscribe<T>>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: Arc::clone(&self.on_subscribe),
        }
    }
}

impl<T> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Build a sequence from its subscribe behaviour
    ///
    /// `on_subscribe` runs once per subscription with a fresh [`Emitter`].
    /// It may emit synchronously, hand the emitter to another thread or the
    /// clock, or keep it forever.
    pub fn from_fn<F>(on_subscribe: F) -> Self
    where
        F: Fn(Emitter<T>) + Send + Sync + 'static,
    {
        Self {
            on_subscribe: Arc::new(on_subscribe),
        }
    }

    /// Subscribe `subscriber` under `context`
    pub fn subscribe_in<S>(&self, subscriber: S, context: Context) -> Subscription
    where
        S: Subscriber<T>,
    {
        let subscription = Subscription::new();
        self.subscribe_child(subscriber, subscription.clone(), context);
        subscription
    }

    /// Subscribe `subscriber` against the shared wall clock
    pub fn subscribe_with<S>(&self, subscriber: S) -> Subscription
    where
        S: Subscriber<T>,
    {
        self.subscribe_in(subscriber, Context::default())
    }

    /// Subscribe with a value callback only
    ///
    /// A terminal error has no handler here. It is logged at error level and
    /// kept in the returned [`Disposable`] (see
    /// [`Disposable::unhandled_error`]).
    pub fn subscribe<N>(&self, on_next: N) -> Disposable
    where
        N: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_lambda(LambdaSubscriber {
            on_next,
            on_error: None::<fn(FluxError)>,
            on_complete: None::<fn()>,
            unhandled: Arc::new(Mutex::new(None)),
        })
    }

    /// Subscribe with value, error and completion callbacks
    pub fn subscribe_all<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Disposable
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(FluxError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.subscribe_lambda(LambdaSubscriber {
            on_next,
            on_error: Some(on_error),
            on_complete: Some(on_complete),
            unhandled: Arc::new(Mutex::new(None)),
        })
    }

    fn subscribe_lambda<N, E, C>(&self, subscriber: LambdaSubscriber<N, E, C>) -> Disposable
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(FluxError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        let unhandled = Arc::clone(&subscriber.unhandled);
        let subscription = self.subscribe_with(subscriber);
        Disposable::new(subscription, unhandled)
    }

    /// Attach `subscriber` on an existing subscription
    pub(crate) fn subscribe_child<S>(&self, subscriber: S, subscription: Subscription, context: Context)
    where
        S: Subscriber<T>,
    {
        subscriber.on_subscribe(&subscription);
        self.subscribe_emitter(Emitter::new(subscriber, subscription, context));
    }

    pub(crate) fn subscribe_emitter(&self, emitter: Emitter<T>) {
        if emitter.is_closed() {
            return;
        }
        (self.on_subscribe)(emitter);
    }

    /// Build an operator on top of this sequence
    ///
    /// For every downstream subscription, `make` receives the downstream
    /// emitter and the child subscription the upstream runs on, and returns
    /// the subscriber attached upstream.
    pub(crate) fn lift<U, S, F>(&self, make: F) -> Flux<U>
    where
        U: Send + 'static,
        S: Subscriber<T>,
        F: Fn(Emitter<U>, Subscription) -> S + Send + Sync + 'static,
    {
        let upstream = self.clone();
        Flux::from_fn(move |downstream: Emitter<U>| {
            let subscription = downstream.subscription().child();
            let context = downstream.context().clone();
            let subscriber = make(downstream, subscription.clone());
            upstream.subscribe_child(subscriber, subscription, context);
        })
    }
}

struct LambdaSubscriber<N, E, C> {
    on_next: N,
    on_error: Option<E>,
    on_complete: Option<C>,
    unhandled: Arc<Mutex<Option<FluxError>>>,
}

impl<T, N, E, C> Subscriber<T> for LambdaSubscriber<N, E, C>
where
    T: Send + 'static,
    N: Fn(T) + Send + Sync + 'static,
    E: Fn(FluxError) + Send + Sync + 'static,
    C: Fn() + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        (self.on_next)(value);
    }

    fn on_error(&self, failure: FluxError) {
        match &self.on_error {
            Some(handler) => handler(failure),
            None => {
                error!(
                    code = failure.code(),
                    category = failure.category(),
                    error = %failure,
                    "unhandled error in subscription"
                );
                *self.unhandled.lock() = Some(failure);
            }
        }
    }

    fn on_complete(&self) {
        if let Some(handler) = &self.on_complete {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_each_subscription_is_independent() {
        let subscribed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&subscribed);
        let flux = Flux::from_fn(move |emitter: Emitter<usize>| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            emitter.next(n);
            emitter.complete();
        });

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        flux.subscribe(move |v| a.lock().push(v));
        flux.subscribe(move |v| b.lock().push(v));

        assert_eq!(*first.lock(), vec![0]);
        assert_eq!(*second.lock(), vec![1]);
    }

    #[test]
    fn test_unhandled_error_is_retained() {
        let disposable = Flux::<i32>::error(FluxError::msg("boom")).subscribe(|_| {});
        let err = disposable.unhandled_error().unwrap();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_handled_error_is_not_retained() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let disposable = Flux::<i32>::error(FluxError::msg("boom")).subscribe_all(
            |_| {},
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        );
        assert!(disposable.unhandled_error().is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_twice_is_noop() {
        let disposable = Flux::<i32>::never().subscribe(|_| {});
        disposable.dispose();
        disposable.dispose();
        assert!(disposable.is_disposed());
    }
}
