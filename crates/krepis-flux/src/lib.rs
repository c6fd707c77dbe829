//! Krepis Flux - Reactive Streams
//!
//! # Overview
//!
//! `krepis-flux` provides push-based reactive sequences: a [`Flux`] is a
//! reusable description of values followed by completion or an error. It
//! comes with composable operators, fan-in combinators, pluggable
//! schedulers, and a [`StepVerifier`] that checks time-based pipelines
//! against a virtual clock.
//!
//! # Trinity Architecture
//!
//! This crate follows the Trinity Architecture pattern:
//!
//! - **Domain**: streams, clocks, schedulers, verifier
//! - **Infrastructure**: configuration ([`FluxConfig`])
//! - **Adapters**: blocking bridges for pull-based callers
//!
//! # Delivery Laws
//!
//! Every subscription obeys these invariants:
//!
//! - **Ordering**: signals of one subscription never overlap and arrive in
//!   order
//! - **Termination**: at most one of `on_error` / `on_complete`, and
//!   nothing after it
//! - **Cancellation**: once cancelled, nothing more is delivered and every
//!   upstream is cancelled too
//! - **Independence**: two subscriptions to one `Flux` share no state
//!
//! # Usage
//!
//! ```rust
//! use krepis_flux::Flux;
//! use std::time::Duration;
//!
//! let batches = Flux::range(0, 10)
//!     .buffer(3)
//!     .block_collect(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Trinity Architecture Layers
pub mod adapters;
pub mod domain;
pub mod infrastructure;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Re-export Primary Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Streams
pub use domain::{Context, Emitter, Flux, FluxSink, Signal, Subscriber, SynchronousSink};
pub use domain::{Disposable, Subscription};

// Errors
pub use domain::{ErrorKind, FluxError, SchedulerError, VerifyError};

// Time and execution
pub use domain::{Clock, ClockInstant, TaskHandle, VirtualClock, WallClock};
pub use domain::{Scheduler, SchedulerKind, Worker};

// Verification
pub use domain::{StepVerifier, VerifierState};

// Configuration and adapters
pub use adapters::BlockingIter;
pub use infrastructure::{ConfigError, FluxConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
