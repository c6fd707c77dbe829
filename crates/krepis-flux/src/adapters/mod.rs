//! Adapters Layer - Ports & Adapters Pattern
//!
//! Connects the push-based domain to callers outside it.
//!
//! # Hexagonal Architecture
//! - Outbound adapters: Flux → blocking callers (collect, last, iterator)

pub mod blocking;

pub use blocking::BlockingIter;
