//! Remote configuration service client.
//!
//! # Data Flow
//! ```text
//! reconciliation tick
//!     → client.rs fetch_config (GET, retried, 10 s deadline)
//!     → models decode + validate
//!     → ... apply ...
//!     → client.rs send_event / report_status (best effort)
//! ```
//!
//! # Design Decisions
//! - Base URL is validated at construction; a bad host never sends a request
//! - Only the desired-state GET retries; writes are fire-once
//! - Bodies are size-capped and drained so connections stay reusable

pub mod client;
mod guard;

pub use client::{ApiError, ClientError, VpsieClient};
