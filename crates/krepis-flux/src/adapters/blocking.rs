//! Blocking adapters
//!
//! Bridge a push-based [`Flux`] to code that wants to pull: collect the
//! whole sequence, wait for its last value, or iterate it. Every wait is
//! bounded; an expired wait cancels the subscription and reports
//! [`FluxError::Timeout`].

use crate::domain::error::FluxError;
use crate::domain::flux::{Flux, Subscriber};
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use crate::infrastructure::config::FluxConfig;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

impl<T: Send + 'static> Flux<T> {
    /// Subscribe and block until the sequence terminates, returning every
    /// value
    ///
    /// # Errors
    /// The terminal error of the sequence, or [`FluxError::Timeout`] if it
    /// did not terminate within `timeout`.
    pub fn block_collect(&self, timeout: Duration) -> Result<Vec<T>, FluxError> {
        let shared = Arc::new(BlockShared {
            state: Mutex::new(BlockState {
                values: Vec::new(),
                outcome: None,
            }),
            done: Condvar::new(),
        });
        let subscription = self.subscribe_with(BlockSubscriber {
            shared: Arc::clone(&shared),
        });

        let deadline = Instant::now() + timeout;
        let mut state = shared.state.lock();
        while state.outcome.is_none() {
            if shared.done.wait_until(&mut state, deadline).timed_out() && state.outcome.is_none() {
                drop(state);
                subscription.cancel();
                warn!(?timeout, "blocking collect timed out");
                return Err(FluxError::Timeout(timeout));
            }
        }
        match state.outcome.take() {
            Some(Err(error)) => Err(error),
            _ => Ok(mem::take(&mut state.values)),
        }
    }

    /// [`block_collect`](Self::block_collect) bounded by the configured
    /// blocking timeout
    ///
    /// # Errors
    /// See [`block_collect`](Self::block_collect).
    pub fn block_collect_with(&self, config: &FluxConfig) -> Result<Vec<T>, FluxError> {
        self.block_collect(config.blocking_timeout)
    }

    /// Subscribe and block until the sequence terminates, returning its
    /// last value
    ///
    /// # Errors
    /// See [`block_collect`](Self::block_collect).
    pub fn block_last(&self, timeout: Duration) -> Result<Option<T>, FluxError> {
        self.take_last(1)
            .block_collect(timeout)
            .map(|mut values| values.pop())
    }

    /// Iterate the sequence, waiting at most `timeout` for each signal
    ///
    /// Dropping the iterator cancels the subscription.
    pub fn to_iter(&self, timeout: Duration) -> BlockingIter<T> {
        let (tx, rx) = unbounded();
        let subscription = self.subscribe_with(ChannelSubscriber { tx });
        BlockingIter {
            rx,
            subscription,
            timeout,
            finished: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// block_collect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BlockShared<T> {
    state: Mutex<BlockState<T>>,
    done: Condvar,
}

struct BlockState<T> {
    values: Vec<T>,
    outcome: Option<Result<(), FluxError>>,
}

struct BlockSubscriber<T> {
    shared: Arc<BlockShared<T>>,
}

impl<T> BlockSubscriber<T> {
    fn finish(&self, outcome: Result<(), FluxError>) {
        self.shared.state.lock().outcome = Some(outcome);
        self.shared.done.notify_all();
    }
}

impl<T: Send + 'static> Subscriber<T> for BlockSubscriber<T> {
    fn on_next(&self, value: T) {
        self.shared.state.lock().values.push(value);
    }

    fn on_error(&self, error: FluxError) {
        self.finish(Err(error));
    }

    fn on_complete(&self) {
        self.finish(Ok(()));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// to_iter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ChannelSubscriber<T> {
    tx: Sender<Signal<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn on_next(&self, value: T) {
        // The receiver may be gone already; the iterator cancels on drop.
        let _ = self.tx.send(Signal::Next(value));
    }

    fn on_error(&self, error: FluxError) {
        let _ = self.tx.send(Signal::Error(error));
    }

    fn on_complete(&self) {
        let _ = self.tx.send(Signal::Complete);
    }
}

/// Pull-based view of a [`Flux`], created by [`Flux::to_iter`]
///
/// Yields `Ok(value)` per value. The sequence's error, or a
/// [`FluxError::Timeout`] when no signal arrived in time, is yielded once as
/// `Err` and ends the iteration.
#[derive(Debug)]
pub struct BlockingIter<T> {
    rx: Receiver<Signal<T>>,
    subscription: Subscription,
    timeout: Duration,
    finished: bool,
}

impl<T> BlockingIter<T> {
    /// Stop iterating and cancel the subscription
    pub fn cancel(&mut self) {
        self.finished = true;
        self.subscription.cancel();
    }
}

impl<T> Iterator for BlockingIter<T> {
    type Item = Result<T, FluxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv_timeout(self.timeout) {
            Ok(Signal::Next(value)) => Some(Ok(value)),
            Ok(Signal::Complete) | Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                None
            }
            Ok(Signal::Error(error)) => {
                self.finished = true;
                Some(Err(error))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.cancel();
                Some(Err(FluxError::Timeout(self.timeout)))
            }
        }
    }
}

impl<T> Drop for BlockingIter<T> {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}
