//! Sources
//!
//! | Source                        | Signals                                   |
//! |-------------------------------|-------------------------------------------|
//! | `just` / `from_vec` / collect | each value in order, then complete        |
//! | `empty`                       | complete                                  |
//! | `never`                       | nothing                                   |
//! | `error`                       | the error                                 |
//! | `range(start, count)`         | `start .. start + count`, then complete   |
//! | `interval*`                   | 0, 1, 2, ... on the context clock         |
//! | `generate*`                   | one value per sink invocation             |
//! | `create`                      | whatever the callback pushes              |

use super::emitter::{Emitter, Serializer};
use super::Flux;
use crate::domain::clock::{ClockInstant, TaskHandle};
use crate::domain::error::FluxError;
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

impl<T: Clone + Send + Sync + 'static> Flux<T> {
    /// Emit each value in order, then complete
    pub fn just<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::from_vec(values.into_iter().collect())
    }

    /// Emit the elements of `values` in order, then complete
    pub fn from_vec(values: Vec<T>) -> Self {
        let values = Arc::new(values);
        Flux::from_fn(move |emitter: Emitter<T>| {
            for value in values.iter() {
                if emitter.is_closed() {
                    return;
                }
                emitter.next(value.clone());
            }
            emitter.complete();
        })
    }
}

impl<T: Clone + Send + Sync + 'static> FromIterator<T> for Flux<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Complete immediately
    pub fn empty() -> Self {
        Flux::from_fn(|emitter: Emitter<T>| emitter.complete())
    }

    /// Never signal anything
    pub fn never() -> Self {
        Flux::from_fn(|_: Emitter<T>| {})
    }

    /// Fail immediately with `error`
    pub fn error(error: FluxError) -> Self {
        Flux::from_fn(move |emitter: Emitter<T>| emitter.error(error.clone()))
    }

    /// Stateless synchronous generator
    ///
    /// `generator` is invoked repeatedly until it completes or fails. Each
    /// invocation must call [`SynchronousSink::next`] at most once and may
    /// additionally call `complete` or `error`. A second `next` in one
    /// invocation emits the first value and then a contract violation; an
    /// invocation that signals nothing is also a contract violation.
    pub fn generate<G>(generator: G) -> Self
    where
        G: Fn(&mut SynchronousSink<T>) + Send + Sync + 'static,
    {
        Self::generate_with_state(
            || (),
            move |(), sink: &mut SynchronousSink<T>| generator(sink),
        )
    }

    /// Synchronous generator threading a state through invocations
    ///
    /// `init` produces the initial state for each subscription.
    pub fn generate_with_state<S, I, G>(init: I, generator: G) -> Self
    where
        I: Fn() -> S + Send + Sync + 'static,
        G: Fn(S, &mut SynchronousSink<T>) -> S + Send + Sync + 'static,
    {
        Flux::from_fn(move |emitter: Emitter<T>| {
            let mut state = init();
            loop {
                if emitter.is_closed() {
                    return;
                }
                let mut sink = SynchronousSink::new();
                state = generator(state, &mut sink);
                if !sink.flush(&emitter) {
                    return;
                }
            }
        })
    }

    /// Imperative source
    ///
    /// `producer` runs once per subscription and may push through the
    /// [`FluxSink`] synchronously or keep it and push later from any thread.
    pub fn create<P>(producer: P) -> Self
    where
        P: Fn(FluxSink<T>) + Send + Sync + 'static,
    {
        Flux::from_fn(move |emitter: Emitter<T>| {
            producer(FluxSink {
                serializer: Arc::new(Serializer::new(emitter)),
            });
        })
    }
}

impl Flux<i64> {
    /// Emit `count` consecutive integers starting at `start`, then complete
    pub fn range(start: i64, count: u64) -> Self {
        Flux::from_fn(move |emitter: Emitter<i64>| {
            let mut value = start;
            for _ in 0..count {
                if emitter.is_closed() {
                    return;
                }
                emitter.next(value);
                value = value.wrapping_add(1);
            }
            emitter.complete();
        })
    }
}

impl Flux<u64> {
    /// Emit 0, 1, 2, ... every `period` on the context clock, starting one
    /// `period` after subscription
    pub fn interval(period: Duration) -> Self {
        Self::interval_delayed(period, period)
    }

    /// Emit 0, 1, 2, ... on the context clock: the first tick after
    /// `initial_delay`, then one every `period`
    ///
    /// Ticks are scheduled at absolute instants, so slow consumers do not
    /// make the sequence drift. A zero `period` fails with a contract
    /// violation.
    pub fn interval_delayed(initial_delay: Duration, period: Duration) -> Self {
        if period.is_zero() {
            return Flux::error(FluxError::contract("interval", "period must be positive"));
        }
        Flux::from_fn(move |emitter: Emitter<u64>| {
            let origin = emitter.context().clock().now();
            let pending: Arc<Mutex<Option<TaskHandle>>> = Arc::new(Mutex::new(None));
            let slot = Arc::clone(&pending);
            emitter.subscription().on_cancel(move || {
                if let Some(handle) = slot.lock().take() {
                    handle.cancel();
                }
            });
            let ticker = Ticker {
                emitter,
                pending,
                origin,
                initial_delay,
                period,
            };
            Arc::new(ticker).schedule(0);
        })
    }
}

struct Ticker {
    emitter: Emitter<u64>,
    pending: Arc<Mutex<Option<TaskHandle>>>,
    origin: ClockInstant,
    initial_delay: Duration,
    period: Duration,
}

impl Ticker {
    fn instant_of(&self, tick: u64) -> ClockInstant {
        let offset = u32::try_from(tick).map_or(Duration::MAX, |t| self.period.saturating_mul(t));
        self.origin
            .saturating_add(self.initial_delay)
            .saturating_add(offset)
    }

    fn schedule(self: Arc<Self>, tick: u64) {
        if self.emitter.is_closed() {
            return;
        }
        let at = self.instant_of(tick);
        let clock = Arc::clone(self.emitter.context().clock());
        let this = Arc::clone(&self);
        let scheduled = clock.schedule_at(
            at,
            Box::new(move || {
                this.emitter.next(tick);
                this.schedule(tick + 1);
            }),
        );
        match scheduled {
            Ok(handle) => {
                if self.emitter.is_closed() {
                    handle.cancel();
                } else {
                    *self.pending.lock() = Some(handle);
                }
            }
            Err(error) => self.emitter.error(error),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sinks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
/// Single-use sink handed to one `generate` invocation
#[derive(Debug)]
pub struct SynchronousSink<T> {
    value: Option<T>,
    extra_next: bool,
    terminal: Option<Signal<T>>,
}

impl<T: Send + 'static> SynchronousSink<T> {
    fn new() -> Self {
        Self {
            value: None,
            extra_next: false,
            terminal: None,
        }
    }

    /// Emit one value; only one call per invocation is allowed
    pub fn next(&mut self, value: T) {
        if self.value.is_some() {
            self.extra_next = true;
        } else {
            self.value = Some(value);
        }
    }

    /// Complete the sequence after this invocation
    pub fn complete(&mut self) {
        if self.terminal.is_none() {
            self.terminal = Some(Signal::Complete);
        }
    }

    /// Fail the sequence after this invocation
    pub fn error(&mut self, error: FluxError) {
        if self.terminal.is_none() {
            self.terminal = Some(Signal::Error(error));
        }
    }

    /// Push what this invocation produced; `false` once the sequence ended
    fn flush(self, emitter: &Emitter<T>) -> bool {
        let produced = self.value.is_some();
        if let Some(value) = self.value {
            emitter.next(value);
        }
        if self.extra_next {
            emitter.error(FluxError::contract(
                "generate",
                "more than one call to next in a single invocation",
            ));
            return false;
        }
        match self.terminal {
            Some(terminal) => {
                emitter.deliver(terminal);
                false
            }
            None if !produced => {
                emitter.error(FluxError::contract(
                    "generate",
                    "invocation called neither next, complete nor error",
                ));
                false
            }
            None => true,
        }
    }
}

/// Thread-safe push handle handed to a `create` producer
pub struct FluxSink<T> {
    serializer: Arc<Serializer<T>>,
}

impl<T> Clone for FluxSink<T> {
    fn clone(&self) -> Self {
        Self {
            serializer: Arc::clone(&self.serializer),
        }
    }
}

impl<T: Send + 'static> FluxSink<T> {
    /// Emit a value
    pub fn next(&self, value: T) {
        self.serializer.emit(Signal::Next(value));
    }

    /// Complete the sequence
    pub fn complete(&self) {
        self.serializer.emit(Signal::Complete);
    }

    /// Fail the sequence
    pub fn error(&self, error: FluxError) {
        self.serializer.emit(Signal::Error(error));
    }

    /// Whether the consumer cancelled or the sequence already terminated
    pub fn is_cancelled(&self) -> bool {
        self.serializer.emitter().is_closed()
    }

    /// Run `hook` when the consumer cancels or the sequence terminates
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.subscription().on_cancel(hook);
    }

    fn subscription(&self) -> &Subscription {
        self.serializer.emitter().subscription()
    }
}
