//! Clock Module - Time Source Abstraction
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Operator (interval, delay_elements, buffer_timeout)   │
//! │  ctx.clock().schedule(period, task)                    │
//! └────────────────────────────────────────────────────────┘
//!                      │  Arc<dyn Clock>
//!          ┌───────────┴───────────┐
//!          │                       │
//!   Production                 Verification
//!   (wall time)                (virtual time)
//!          │                       │
//!      WallClock               VirtualClock
//!          │                       │
//!   BinaryHeap + Condvar     BinaryHeap + Mutex
//!   timer thread             advanced by the verifier
//! ```
//!
//! # Ordering Laws
//! - Time never decreases
//! - Tasks fire in `(fire_at, scheduling order)` order
//! - A cancelled task never runs

mod backend;
mod production_backend;
mod types;
mod verification_backend;

pub use backend::Clock;
pub use production_backend::WallClock;
pub use types::{ClockInstant, Task, TaskHandle, TaskId};
pub use verification_backend::VirtualClock;

pub(crate) use types::ScheduledTask;
