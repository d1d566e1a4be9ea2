//! Observability subsystem.
//!
//! The agent logs through `tracing` and records counters through the
//! `metrics` macros; whether those counters go anywhere is up to the
//! recorder the embedding process installs.

pub mod logging;

pub use logging::init_logging;
