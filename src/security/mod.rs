//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming call (after global middleware):
//!     → auth.rs (authenticator decides AuthState)
//!     → secrets.rs (credentials looked up by ID)
//!     → Pass to schema validation and the route
//! ```
//!
//! # Design Decisions
//! - Fail closed: a route registers only when an auth middleware exists
//! - Secrets are looked up per call; nothing is cached in the middleware
//! - No trust in client input

pub mod auth;
pub mod secrets;

pub use auth::{AuthState, Authenticator};
pub use secrets::SecretProvider;
