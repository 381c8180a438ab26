//! Versioned RPC dispatch engine.
//!
//! # Data Flow
//! ```text
//! Startup (single thread):
//!     RouteDef (version, method, handler | withdrawal)
//!     → service.rs (validate, wrap schema + route middleware)
//!     → registry.rs (store entry, re-resolve every version)
//!     → into_dispatcher (wrap global + auth, freeze)
//!
//! Serve time (concurrent, lock-free):
//!     POST /<version>/<method>
//!     → dispatch.rs (verb/query checks, path parse, table lookup)
//!     → middleware chain (global → auth → schema → route)
//!     → handler.rs (decode body, call business fn, encode reply)
//!     → error.rs (normalize, status code, JSON error body)
//! ```

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod registry;
pub mod schema;
pub mod service;
pub mod version;

pub use dispatch::{Dispatcher, ENDPOINT_STATUS};
pub use error::{ErrorClass, RpcError, RpcResult};
pub use handler::{Call, Handler, Reply, RpcContext, RpcOutput, RpcRecord};
pub use middleware::{Middleware, Next};
pub use registry::{RegistrationError, Registry, ResolvedTable, Route};
pub use service::{RouteDef, Service};
pub use version::{MethodName, ReleaseDate, Version};
