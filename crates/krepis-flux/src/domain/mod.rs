//! Domain Layer - Streams, Time and Verification
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Flux Module                   Verifier Module              │
//! │  ├─ Flux<T> (description)      ├─ StepVerifier<T>           │
//! │  ├─ Emitter / Subscriber       ├─ VerifierState             │
//! │  └─ operators, combinators     └─ VerifyError               │
//! │                                                             │
//! │  Clock Module                  Scheduler Module             │
//! │  ├─ Clock (trait)              ├─ Scheduler (handle)        │
//! │  ├─ WallClock                  ├─ Worker (pinned)           │
//! │  └─ VirtualClock               └─ SchedulerKind             │
//! │                                                             │
//! │  Signal, Subscription, FluxError                            │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every time-based operator resolves its clock from the subscription
//! context, so one pipeline runs unchanged under [`WallClock`] and under
//! [`VirtualClock`].

pub mod clock;
pub mod error;
pub mod flux;
pub mod scheduler;
pub mod signal;
pub mod subscription;
pub mod verifier;

pub use clock::{Clock, ClockInstant, TaskHandle, VirtualClock, WallClock};
pub use error::{ErrorKind, FluxError};
pub use flux::{Context, Emitter, Flux, FluxSink, Subscriber, SynchronousSink};
pub use scheduler::{Scheduler, SchedulerError, SchedulerKind, Worker};
pub use signal::Signal;
pub use subscription::{Disposable, Subscription};
pub use verifier::{StepVerifier, VerifierState, VerifyError};
