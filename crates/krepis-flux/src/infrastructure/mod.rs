//! Infrastructure Layer - Runtime Configuration
//!
//! # Responsibilities
//! - Default timeouts and pool sizes
//! - Environment overrides (`KREPIS_FLUX_*`)

pub mod config;

pub use config::{ConfigError, FluxConfig};
