//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → consumed at startup by the server, auth and observability
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart, since the
//!   RPC registry itself is frozen at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, AuthMode, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ServiceConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
