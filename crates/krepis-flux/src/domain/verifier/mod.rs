//! Verifier Module - Scripted Step Verification
//!
//! # Overview
//!
//! [`StepVerifier`] subscribes to a [`Flux`] and checks its signals against
//! a script of expectations, one step at a time.
//!
//! ```text
//!  Building ──verify()──► Subscribed ──► Awaiting ◄──► Asserting
//!                                           │              │
//!                                       TimedOut      Completed | Failed
//! ```
//!
//! # Time Modes
//!
//! - [`StepVerifier::create`] runs against the shared wall clock. Every
//!   expectation waits at most the verifier timeout for its signal.
//! - [`StepVerifier::with_virtual_time`] builds the sequence under a fresh
//!   [`VirtualClock`]. `expect_no_event` and `then_await` advance the clock
//!   instead of sleeping, so hours of scheduled time verify in
//!   milliseconds.
//!
//! # Example
//!
//! ```rust
//! use krepis_flux::{Flux, StepVerifier};
//! use std::time::Duration;
//!
//! let elapsed = StepVerifier::with_virtual_time(|| {
//!     Flux::interval_delayed(Duration::from_secs(600), Duration::from_secs(5)).take(2)
//! })
//! .expect_no_event(Duration::from_secs(600))
//! .then_await(Duration::from_secs(5))
//! .expect_next(0)
//! .then_await(Duration::from_secs(5))
//! .expect_next(1)
//! .verify_complete()
//! .unwrap();
//! assert!(elapsed < Duration::from_secs(5));
//! ```

mod error;
mod recorder;
mod step;

pub use error::VerifyError;

use crate::domain::clock::{Clock, VirtualClock};
use crate::domain::error::{ErrorKind, FluxError};
use crate::domain::flux::{Context, Flux};
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use crate::infrastructure::config::FluxConfig;
use recorder::Recorder;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use step::{Step, ValueFailure};
use tracing::debug;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verifier State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of one verification run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierState {
    /// Script being assembled
    Building,
    /// Subscribed, no expectation evaluated yet
    Subscribed,
    /// Waiting for the next signal
    Awaiting,
    /// Checking a received signal
    Asserting,
    /// Every expectation held
    Completed,
    /// An expectation did not hold
    Failed,
    /// An expected signal never arrived
    TimedOut,
}

impl VerifierState {
    /// Whether the run is over
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for VerifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Building => "Building",
            Self::Subscribed => "Subscribed",
            Self::Awaiting => "Awaiting",
            Self::Asserting => "Asserting",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(name)
    }
}

impl VerifyError {
    /// Final state of the run that produced this error
    pub fn state(&self) -> VerifierState {
        if self.is_timeout() {
            VerifierState::TimedOut
        } else {
            VerifierState::Failed
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StepVerifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Source<T> {
    Live(Flux<T>),
    Virtual(Box<dyn FnOnce() -> Flux<T> + Send>),
}

/// Builder and runner of a verification script
///
/// Nothing is subscribed until [`verify`](Self::verify). The script must
/// end with a terminal expectation: [`expect_complete`](Self::expect_complete),
/// an `expect_error*` step, or [`then_cancel`](Self::then_cancel). Steps
/// after the first terminal one are not evaluated.
#[must_use = "a verifier does nothing until verify() is called"]
pub struct StepVerifier<T> {
    source: Source<T>,
    steps: Vec<Step<T>>,
    timeout: Duration,
}

impl<T: fmt::Debug + Send + 'static> StepVerifier<T> {
    /// Verify `flux` in wall-clock time
    pub fn create(flux: &Flux<T>) -> Self {
        Self::new(Source::Live(flux.clone()))
    }

    /// Verify the sequence built by `supplier` under a fresh virtual clock
    pub fn with_virtual_time<F>(supplier: F) -> Self
    where
        F: FnOnce() -> Flux<T> + Send + 'static,
    {
        Self::new(Source::Virtual(Box::new(supplier)))
    }

    fn new(source: Source<T>) -> Self {
        Self {
            source,
            steps: Vec::new(),
            timeout: FluxConfig::default().verify_timeout,
        }
    }

    fn step(mut self, step: Step<T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Maximum wall time to wait for any single signal
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Take the timeout from `config`
    pub fn with_config(self, config: &FluxConfig) -> Self {
        self.timeout(config.verify_timeout)
    }

    /// Expect the subscription to have been established
    pub fn expect_subscription(self) -> Self {
        self.step(Step::Subscription)
    }

    /// Expect the next signal to be `value`
    pub fn expect_next(self, value: T) -> Self
    where
        T: PartialEq,
    {
        let mut expected = Some(value);
        self.step(Step::Next(Box::new(move |actual: T| match expected.take() {
            Some(expected) if expected == actual => Ok(()),
            expected => Err(ValueFailure::Mismatch {
                expected: expected.map_or_else(|| "nothing".to_string(), |v| format!("{v:?}")),
                actual: format!("{actual:?}"),
            }),
        })))
    }

    /// Expect the next signals to be `values`, in order
    pub fn expect_next_all<I>(self, values: I) -> Self
    where
        T: PartialEq,
        I: IntoIterator<Item = T>,
    {
        values.into_iter().fold(self, Self::expect_next)
    }

    /// Expect `count` values, whatever they are
    pub fn expect_next_count(self, count: u64) -> Self {
        self.step(Step::NextCount(count))
    }

    /// Expect a value accepted by `predicate`
    pub fn expect_next_matches<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        self.step(Step::Next(Box::new(move |actual: T| {
            if predicate(&actual) {
                Ok(())
            } else {
                Err(ValueFailure::Rejected {
                    description: "value predicate".to_string(),
                    actual: format!("{actual:?}"),
                })
            }
        })))
    }

    /// Expect a value and hand it to `consumer`
    ///
    /// The consumer may assert on the value; a panic fails the enclosing
    /// test like any other assertion.
    pub fn consume_next_with<F>(self, mut consumer: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        self.step(Step::Next(Box::new(move |actual: T| {
            consumer(actual);
            Ok(())
        })))
    }

    /// Expect no signal for `duration`
    ///
    /// Under virtual time the clock is advanced by `duration`; a task due
    /// exactly at the end is left for the next step.
    pub fn expect_no_event(self, duration: Duration) -> Self {
        self.step(Step::NoEvent(duration))
    }

    /// Let `duration` pass: advance the virtual clock, or sleep
    pub fn then_await(self, duration: Duration) -> Self {
        self.step(Step::Await(duration))
    }

    /// Expect normal termination
    pub fn expect_complete(self) -> Self {
        self.step(Step::Complete)
    }

    /// Expect termination with an error of `kind`
    pub fn expect_error(self, kind: ErrorKind) -> Self {
        self.step(Step::Error {
            description: format!("kind {kind}"),
            check: Box::new(move |error: &FluxError| error.kind() == kind),
        })
    }

    /// Expect termination with an error accepted by `predicate`
    pub fn expect_error_matches<P>(self, predicate: P) -> Self
    where
        P: FnMut(&FluxError) -> bool + Send + 'static,
    {
        self.step(Step::Error {
            description: "error predicate".to_string(),
            check: Box::new(predicate),
        })
    }

    /// Cancel the subscription; ends the script
    pub fn then_cancel(self) -> Self {
        self.step(Step::Cancel)
    }

    /// Run the script
    ///
    /// Returns the wall-clock time the run took.
    ///
    /// # Errors
    /// The first expectation that did not hold, or
    /// [`VerifyError::MissingTerminal`] when the script has no terminal step.
    pub fn verify(self) -> Result<Duration, VerifyError> {
        let started = Instant::now();
        let StepVerifier {
            source,
            steps,
            timeout,
        } = self;
        if !steps.iter().any(Step::is_terminal) {
            return Err(VerifyError::MissingTerminal { steps: steps.len() });
        }

        let mut run = Run::start(source, timeout);
        let outcome = run.execute(steps);
        run.subscription.cancel();
        match &outcome {
            Ok(()) => run.transition(VerifierState::Completed),
            Err(err) => {
                run.transition(err.state());
                debug!(error = %err, code = err.code(), "verification failed");
            }
        }
        outcome.map(|()| started.elapsed())
    }

    /// Expect completion, then [`verify`](Self::verify)
    ///
    /// # Errors
    /// See [`verify`](Self::verify).
    pub fn verify_complete(self) -> Result<Duration, VerifyError> {
        self.expect_complete().verify()
    }

    /// Expect any error, then [`verify`](Self::verify)
    ///
    /// # Errors
    /// See [`verify`](Self::verify).
    pub fn verify_error(self) -> Result<Duration, VerifyError> {
        self.expect_error_matches(|_| true).verify()
    }
}

impl<T> fmt::Debug for StepVerifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        f.debug_struct("StepVerifier")
            .field("virtual_time", &matches!(self.source, Source::Virtual(_)))
            .field("steps", &steps)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Run<T> {
    recorder: Arc<Recorder<T>>,
    subscription: Subscription,
    clock: Option<Arc<VirtualClock>>,
    timeout: Duration,
    state: VerifierState,
}

impl<T: fmt::Debug + Send + 'static> Run<T> {
    fn start(source: Source<T>, timeout: Duration) -> Self {
        let recorder = Recorder::new();
        let (subscription, clock) = match source {
            Source::Live(flux) => (flux.subscribe_with(Arc::clone(&recorder)), None),
            Source::Virtual(supplier) => {
                let clock = Arc::new(VirtualClock::new());
                let context = Context::new(Arc::clone(&clock) as Arc<dyn Clock>);
                let subscription = supplier().subscribe_in(Arc::clone(&recorder), context);
                (subscription, Some(clock))
            }
        };
        let mut run = Self {
            recorder,
            subscription,
            clock,
            timeout,
            state: VerifierState::Building,
        };
        run.transition(VerifierState::Subscribed);
        run
    }

    fn transition(&mut self, next: VerifierState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "verifier state");
            self.state = next;
        }
    }

    fn execute(&mut self, steps: Vec<Step<T>>) -> Result<(), VerifyError> {
        for (index, step) in steps.into_iter().enumerate() {
            let terminal = step.is_terminal();
            self.apply(index, step)?;
            if terminal {
                break;
            }
        }
        Ok(())
    }

    fn next_signal(&mut self, step: usize, expected: &str) -> Result<Signal<T>, VerifyError> {
        self.transition(VerifierState::Awaiting);
        let deadline = Instant::now() + self.timeout;
        let signal = self.recorder.next_signal(deadline, self.clock.as_deref());
        self.transition(VerifierState::Asserting);
        signal.ok_or_else(|| VerifyError::TimedOut {
            step,
            expected: expected.to_string(),
            waited: self.timeout,
        })
    }

    fn apply(&mut self, index: usize, step: Step<T>) -> Result<(), VerifyError> {
        let expected = step.to_string();
        match step {
            Step::Subscription => {
                let deadline = Instant::now() + self.timeout;
                if !self.recorder.await_subscription(deadline) {
                    return Err(VerifyError::TimedOut {
                        step: index,
                        expected,
                        waited: self.timeout,
                    });
                }
            }
            Step::Next(mut check) => match self.next_signal(index, &expected)? {
                Signal::Next(value) => check(value).map_err(|failure| match failure {
                    ValueFailure::Mismatch { expected, actual } => VerifyError::ValueMismatch {
                        step: index,
                        expected,
                        actual,
                    },
                    ValueFailure::Rejected {
                        description,
                        actual,
                    } => VerifyError::PredicateFailed {
                        step: index,
                        description,
                        actual,
                    },
                })?,
                other => return Err(unexpected(index, expected, &other)),
            },
            Step::NextCount(count) => {
                for _ in 0..count {
                    match self.next_signal(index, &expected)? {
                        Signal::Next(_) => {}
                        other => return Err(unexpected(index, expected, &other)),
                    }
                }
            }
            Step::NoEvent(duration) => self.expect_quiet(index, expected, duration)?,
            Step::Await(duration) => match &self.clock {
                Some(clock) => clock.advance_by(duration),
                None => thread::sleep(duration),
            },
            Step::Complete => match self.next_signal(index, &expected)? {
                Signal::Complete => {}
                other => return Err(unexpected(index, expected, &other)),
            },
            Step::Error {
                description,
                mut check,
            } => match self.next_signal(index, &expected)? {
                Signal::Error(error) if check(&error) => {}
                Signal::Error(error) => {
                    return Err(VerifyError::PredicateFailed {
                        step: index,
                        description,
                        actual: error.to_string(),
                    })
                }
                other => return Err(unexpected(index, expected, &other)),
            },
            Step::Cancel => self.subscription.cancel(),
        }
        Ok(())
    }

    fn expect_quiet(&mut self, index: usize, expected: String, duration: Duration) -> Result<(), VerifyError> {
        self.transition(VerifierState::Awaiting);
        let arrived = match &self.clock {
            Some(clock) => {
                clock.advance_by_exclusive(duration);
                if self.recorder.has_signal() {
                    self.recorder.next_signal(Instant::now(), None)
                } else {
                    None
                }
            }
            None => self.recorder.next_signal(Instant::now() + duration, None),
        };
        self.transition(VerifierState::Asserting);
        match arrived {
            Some(signal) => Err(unexpected(index, expected, &signal)),
            None => Ok(()),
        }
    }
}

fn unexpected<T: fmt::Debug>(step: usize, expected: String, actual: &Signal<T>) -> VerifyError {
    VerifyError::UnexpectedSignal {
        step,
        expected,
        actual: describe(actual),
    }
}

fn describe<T: fmt::Debug>(signal: &Signal<T>) -> String {
    match signal {
        Signal::Next(value) => format!("next({value:?})"),
        Signal::Complete => "completion".to_string(),
        Signal::Error(error) => format!("error({error})"),
    }
}
