//! Signal recorder
//!
//! The subscriber a verification run attaches. It queues every signal so the
//! script can pop them one expectation at a time, and lets the script wait
//! for the next signal with a deadline.

use crate::domain::clock::VirtualClock;
use crate::domain::error::FluxError;
use crate::domain::flux::Subscriber;
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on one condvar wait in virtual mode, so due clock tasks are
/// still run while waiting for signals from other threads
const VIRTUAL_POLL: Duration = Duration::from_millis(5);

pub(crate) struct Recorder<T> {
    state: Mutex<RecorderState<T>>,
    arrived: Condvar,
}

struct RecorderState<T> {
    signals: VecDeque<Signal<T>>,
    subscribed: bool,
}

impl<T> Recorder<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RecorderState {
                signals: VecDeque::new(),
                subscribed: false,
            }),
            arrived: Condvar::new(),
        })
    }

    fn push(&self, signal: Signal<T>) {
        self.state.lock().signals.push_back(signal);
        self.arrived.notify_all();
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    /// Whether a signal is waiting
    pub(crate) fn has_signal(&self) -> bool {
        !self.state.lock().signals.is_empty()
    }

    /// Next signal, waiting until `deadline`
    ///
    /// With a virtual clock, tasks already due are run before every check.
    pub(crate) fn next_signal(&self, deadline: Instant, clock: Option<&VirtualClock>) -> Option<Signal<T>> {
        loop {
            if let Some(clock) = clock {
                clock.run_due();
            }
            let mut state = self.state.lock();
            if let Some(signal) = state.signals.pop_front() {
                return Some(signal);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let until = match clock {
                Some(_) => deadline.min(now + VIRTUAL_POLL),
                None => deadline,
            };
            self.arrived.wait_until(&mut state, until);
            if let Some(signal) = state.signals.pop_front() {
                return Some(signal);
            }
        }
    }

    /// Wait until subscribed or `deadline` passes
    pub(crate) fn await_subscription(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while !state.subscribed {
            if self.arrived.wait_until(&mut state, deadline).timed_out() {
                return state.subscribed;
            }
        }
        true
    }
}

impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&self, _subscription: &Subscription) {
        self.state.lock().subscribed = true;
        self.arrived.notify_all();
    }

    fn on_next(&self, value: T) {
        self.push(Signal::Next(value));
    }

    fn on_error(&self, error: FluxError) {
        self.push(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.push(Signal::Complete);
    }
}
