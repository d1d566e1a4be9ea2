//! Agent configuration subsystem.
//!
//! # Data Flow
//! ```text
//! agent config file (YAML)
//!     → loader.rs (parse & deserialize, apply defaults)
//!     → AgentConfig (immutable for the process lifetime)
//!     → api_key_file read separately, never stored in AgentConfig
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require an agent restart
//! - All fields have defaults to allow minimal configs
//! - The API key lives in its own root-owned file, not in the config tree

pub mod loader;
pub mod schema;

pub use loader::{load_api_key, load_config, ConfigError};
pub use schema::{AgentConfig, EnvoySettings, LoggingConfig, VpsieSettings};
