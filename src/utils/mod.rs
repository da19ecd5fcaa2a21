//! Process-wide helpers: tracing bootstrap and delivery counters.

pub mod bootstrap;
pub mod metrics;
