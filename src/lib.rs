//! Versioned RPC service library.
//!
//! Routes are registered as `(version, method, handler)` triples and served
//! as `POST /<version>/<method>`. Dated versions inherit every method of
//! earlier releases unless overridden or withdrawn; `latest` names the most
//! recent release and `preview` holds experimental methods.

pub mod builtin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod security;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use rpc::{Dispatcher, RouteDef, RpcError, Service};
