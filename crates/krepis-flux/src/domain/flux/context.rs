//! Subscribe context
//!
//! Carries the clock a subscription runs against. Every operator that needs
//! time reads it from the downstream [`Emitter`](super::Emitter), so the
//! same `Flux` description runs against wall time in production and against
//! a [`VirtualClock`](crate::domain::clock::VirtualClock) under the verifier.

use crate::domain::clock::{Clock, WallClock};
use std::fmt;
use std::sync::Arc;

/// Per-subscription environment
#[derive(Clone)]
pub struct Context {
    clock: Arc<dyn Clock>,
}

impl Context {
    /// Context running against `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Clock used by time-based operators
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether the clock is virtual
    pub fn is_virtual(&self) -> bool {
        self.clock.is_virtual()
    }
}

impl Default for Context {
    /// Process-wide shared wall clock
    fn default() -> Self {
        Self::new(WallClock::shared())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("clock", &self.clock.name())
            .finish()
    }
}
