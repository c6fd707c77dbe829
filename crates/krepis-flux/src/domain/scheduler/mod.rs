//! Scheduler Module - Execution Contexts
//!
//! # Module Structure
//!
//! ```text
//! domain/scheduler/
//! ├── types.rs        SchedulerKind, SchedulerError
//! ├── worker_pool.rs  crossbeam channel per worker thread
//! ├── handle.rs       Scheduler / Worker handles
//! └── mod.rs          This file
//! ```
//!
//! # Kinds
//!
//! | Kind        | Threads                         |
//! |-------------|---------------------------------|
//! | `Immediate` | none, runs on the caller        |
//! | `Single`    | 1, named after the scheduler    |
//! | `Pooled`    | fixed `n`                       |
//! | `Parallel`  | `available_parallelism()`       |
//!
//! Delayed work goes through the clock of the subscription context, never
//! through a scheduler, so a scheduler only ever sees tasks that are due.

mod handle;
mod types;
mod worker_pool;

pub use handle::{Scheduler, Worker};
pub use types::{SchedulerError, SchedulerKind};
