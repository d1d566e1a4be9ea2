//! Envoy data-plane integration.
//!
//! # Data Flow
//! ```text
//! validated LoadBalancer
//!     → generator.rs (listener + cluster YAML, static bootstrap)
//!     → store.rs (backup, atomic apply under the config dir)
//!     → reloader.rs (epoch-numbered hot restart of the proxy)
//!
//! On reload failure:
//!     store.rs restores the last-known-good set, epoch rolls back
//! ```
//!
//! # Design Decisions
//! - Rendering is pure; only the store touches the filesystem
//! - The epoch counter lives in one place and is mutated under a lock
//! - The proxy binary also serves as the config validator (--mode validate)

pub mod generator;
pub mod reloader;
pub mod store;
pub mod validator;

pub use generator::{EnvoyConfig, Generator, RenderError};
pub use reloader::{ReloadError, Reloader};
pub use store::{ConfigStore, StoreError};
pub use validator::{BinaryValidator, ValidateError};
