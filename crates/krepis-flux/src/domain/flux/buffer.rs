//! Batching operators

use super::emitter::{Emitter, Serializer};
use super::{Flux, Subscriber};
use crate::domain::clock::TaskHandle;
use crate::domain::error::FluxError;
use crate::domain::signal::Signal;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

impl<T: Send + 'static> Flux<T> {
    /// Group values into vectors of exactly `size`
    ///
    /// A shorter remainder is emitted on completion; an empty buffer is
    /// never emitted. A `size` of zero fails with a contract violation.
    pub fn buffer(&self, size: usize) -> Flux<Vec<T>> {
        if size == 0 {
            return Flux::error(FluxError::contract("buffer", "size must be positive"));
        }
        self.lift(move |downstream, _| BufferSubscriber {
            downstream,
            size,
            current: Mutex::new(Vec::with_capacity(size)),
        })
    }

    /// Group values into vectors of at most `size`, flushing early when
    /// `timeout` elapses after the first value of the current buffer
    ///
    /// The timer runs on the context clock and restarts with every new
    /// buffer.
    pub fn buffer_timeout(&self, size: usize, timeout: Duration) -> Flux<Vec<T>> {
        if size == 0 {
            return Flux::error(FluxError::contract("buffer_timeout", "size must be positive"));
        }
        let upstream = self.clone();
        Flux::from_fn(move |downstream: Emitter<Vec<T>>| {
            let subscription = downstream.subscription().child();
            let context = downstream.context().clone();
            let shared = Arc::new(TimedBuffer {
                serializer: Serializer::new(downstream),
                size,
                timeout,
                state: Mutex::new(TimedState {
                    current: Vec::with_capacity(size),
                    generation: 0,
                    timer: None,
                }),
            });
            let on_cancel = Arc::clone(&shared);
            subscription.on_cancel(move || on_cancel.cancel_timer());
            upstream.subscribe_child(TimedBufferSubscriber { shared }, subscription, context);
        })
    }
}

struct BufferSubscriber<T> {
    downstream: Emitter<Vec<T>>,
    size: usize,
    current: Mutex<Vec<T>>,
}

impl<T: Send + 'static> Subscriber<T> for BufferSubscriber<T> {
    fn on_next(&self, value: T) {
        let full = {
            let mut current = self.current.lock();
            current.push(value);
            (current.len() >= self.size)
                .then(|| mem::replace(&mut *current, Vec::with_capacity(self.size)))
        };
        if let Some(batch) = full {
            self.downstream.next(batch);
        }
    }

    fn on_error(&self, error: FluxError) {
        self.current.lock().clear();
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        let rest = mem::take(&mut *self.current.lock());
        if !rest.is_empty() {
            self.downstream.next(rest);
        }
        self.downstream.complete();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// buffer_timeout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Every flush bumps `generation`. A timer only flushes the buffer of the
// generation it was started for, so a timer racing a size-triggered flush
// is a no-op.

struct TimedBuffer<T> {
    serializer: Serializer<Vec<T>>,
    size: usize,
    timeout: Duration,
    state: Mutex<TimedState<T>>,
}

struct TimedState<T> {
    current: Vec<T>,
    generation: u64,
    timer: Option<TaskHandle>,
}

impl<T: Send + 'static> TimedBuffer<T> {
    fn cancel_timer(&self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.cancel();
        }
    }

    fn flush_locked(&self, state: &mut TimedState<T>) {
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.generation += 1;
        if !state.current.is_empty() {
            let batch = mem::replace(&mut state.current, Vec::with_capacity(self.size));
            self.serializer.enqueue(Signal::Next(batch));
        }
    }

    fn on_timer(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            self.flush_locked(&mut state);
        }
        self.serializer.drain();
    }
}

struct TimedBufferSubscriber<T> {
    shared: Arc<TimedBuffer<T>>,
}

impl<T: Send + 'static> Subscriber<T> for TimedBufferSubscriber<T> {
    fn on_next(&self, value: T) {
        let shared = &self.shared;
        let mut failure = None;
        {
            let mut state = shared.state.lock();
            state.current.push(value);
            if state.current.len() >= shared.size {
                shared.flush_locked(&mut state);
            } else if state.current.len() == 1 {
                let generation = state.generation;
                let timer_owner = Arc::clone(shared);
                let clock = shared.serializer.emitter().context().clock();
                match clock.schedule(
                    shared.timeout,
                    Box::new(move || timer_owner.on_timer(generation)),
                ) {
                    Ok(handle) => state.timer = Some(handle),
                    Err(error) => failure = Some(error),
                }
            }
        }
        match failure {
            Some(error) => shared.serializer.emit(Signal::Error(error)),
            None => shared.serializer.drain(),
        }
    }

    fn on_error(&self, error: FluxError) {
        {
            let mut state = self.shared.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.current.clear();
            self.shared.serializer.enqueue(Signal::Error(error));
        }
        self.shared.serializer.drain();
    }

    fn on_complete(&self) {
        {
            let mut state = self.shared.state.lock();
            self.shared.flush_locked(&mut state);
            self.shared.serializer.enqueue(Signal::Complete);
        }
        self.shared.serializer.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::{Clock, VirtualClock};
    use crate::domain::flux::Context;

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn test_buffer_with_remainder() {
        let got = Flux::range(0, 10).buffer(3).block_collect(WAIT).unwrap();
        assert_eq!(got, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]);
    }

    #[test]
    fn test_buffer_exact_multiple_has_no_empty_tail() {
        let got = Flux::range(0, 4).buffer(2).block_collect(WAIT).unwrap();
        assert_eq!(got, vec![vec![0, 1], vec![2, 3]]);
        assert!(Flux::<i32>::empty().buffer(2).block_collect(WAIT).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_zero_is_contract_violation() {
        assert!(Flux::range(0, 4).buffer(0).block_collect(WAIT).is_err());
    }

    #[test]
    fn test_buffer_timeout_flushes_on_timer() {
        let clock = Arc::new(VirtualClock::new());
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);

        let source = Flux::interval(Duration::from_millis(100)).take(5);
        source
            .buffer_timeout(10, Duration::from_millis(250))
            .subscribe_in(
                CollectBatches(sink),
                Context::new(Arc::clone(&clock) as Arc<dyn Clock>),
            );

        clock.advance_by(Duration::from_millis(350));
        assert_eq!(*batches.lock(), vec![vec![0, 1, 2]]);

        clock.advance_by(Duration::from_secs(1));
        assert_eq!(*batches.lock(), vec![vec![0, 1, 2], vec![3, 4]]);
    }

    struct CollectBatches(Arc<Mutex<Vec<Vec<u64>>>>);

    impl Subscriber<Vec<u64>> for CollectBatches {
        fn on_next(&self, value: Vec<u64>) {
            self.0.lock().push(value);
        }
        fn on_error(&self, _error: FluxError) {}
        fn on_complete(&self) {}
    }
}
