//! Error taxonomy shared by every layer of the RPC engine.
//!
//! # Responsibilities
//! - Carry a stable `code`, free-form `meta` and nested `reasons`
//! - Map codes to HTTP status codes for the transport layer
//! - Recode transport anomalies (EOF, truncated reads, cancellation)
//!
//! # Design Decisions
//! - Codes are plain strings so business logic can add its own
//! - Unknown codes map to 400: a code that reaches the wire was chosen on
//!   purpose unless it is one of the internal codes
//! - The internal cause is never serialized; it only reaches the logs

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known error codes.
pub mod codes {
    pub const UNKNOWN: &str = "unknown";
    pub const COERCION_ERROR: &str = "coercion_error";
    pub const REQUEST_TIMEOUT: &str = "request_timeout";

    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNEXPECTED_INPUT: &str = "unexpected_input";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const ACCESS_DENIED: &str = "access_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const ROUTE_NOT_FOUND: &str = "route_not_found";
    pub const METHOD_NOT_ALLOWED: &str = "method_not_allowed";
    pub const ENDPOINT_WITHDRAWN: &str = "endpoint_withdrawn";
    pub const TOO_MANY_REQUESTS: &str = "too_many_requests";

    pub const MISSING_REQUEST_BODY: &str = "missing_request_body";
    pub const UNEXPECTED_REQUEST_BODY: &str = "unexpected_request_body";
    pub const INVALID_REQUEST_BODY: &str = "invalid_request_body";
    pub const REQUEST_BODY_TOO_LARGE: &str = "request_body_too_large";
    pub const SCHEMA_VIOLATION: &str = "schema_violation";

    pub const EOF: &str = "eof";
    pub const UNEXPECTED_EOF: &str = "unexpected_eof";
    pub const CONTEXT_CANCELED: &str = "context_canceled";
}

/// Broad classification of an error, derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or unroutable request; the client is at fault.
    Request,
    /// Outcome chosen by business logic.
    Business,
    /// Recoded transport anomaly (truncated body, cancellation).
    Transport,
    /// Unexpected failure inside the service.
    Internal,
}

/// Transport anomalies that handlers and layers can raise as a cause.
///
/// Wrapped with [`RpcError::internal`], they are recoded by [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Transport {
    #[error("end of input")]
    Eof,
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("request context canceled")]
    Canceled,
}

/// Structured RPC error: `{ code, meta, reasons }` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    code: String,
    #[serde(default)]
    meta: Map<String, Value>,
    #[serde(default)]
    reasons: Vec<RpcError>,
    #[serde(skip)]
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

/// Result type for handlers and middleware.
pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    /// Create an error with the given code and no metadata.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            meta: Map::new(),
            reasons: Vec::new(),
            cause: None,
        }
    }

    /// Wrap an opaque error as `unknown`, keeping it as the internal cause.
    pub fn internal<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(codes::UNKNOWN).with_cause(err)
    }

    pub fn bad_request() -> Self {
        Self::new(codes::BAD_REQUEST)
    }

    pub fn not_found() -> Self {
        Self::new(codes::NOT_FOUND)
    }

    pub fn unauthorized() -> Self {
        Self::new(codes::UNAUTHORIZED)
    }

    pub fn access_denied() -> Self {
        Self::new(codes::ACCESS_DENIED)
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Append a nested reason.
    pub fn with_reason(mut self, reason: RpcError) -> Self {
        self.reasons.push(reason);
        self
    }

    /// Append several nested reasons, preserving their order.
    pub fn with_reasons(mut self, reasons: impl IntoIterator<Item = RpcError>) -> Self {
        self.reasons.extend(reasons);
        self
    }

    /// Attach the internal cause. It is logged but never sent to clients.
    pub fn with_cause<E>(mut self, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(err));
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn reasons(&self) -> &[RpcError] {
        &self.reasons
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// True if this error or any nested reason carries `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code || self.reasons.iter().any(|r| r.has_code(code))
    }

    /// HTTP status code for transport layers that need one.
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            codes::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            codes::ACCESS_DENIED => StatusCode::FORBIDDEN,
            codes::NOT_FOUND | codes::ROUTE_NOT_FOUND => StatusCode::NOT_FOUND,
            codes::METHOD_NOT_ALLOWED => StatusCode::METHOD_NOT_ALLOWED,
            codes::ENDPOINT_WITHDRAWN => StatusCode::GONE,
            codes::TOO_MANY_REQUESTS => StatusCode::TOO_MANY_REQUESTS,
            codes::UNKNOWN | codes::COERCION_ERROR | codes::REQUEST_TIMEOUT => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.code.as_str() {
            codes::UNKNOWN | codes::COERCION_ERROR => ErrorClass::Internal,
            codes::EOF | codes::UNEXPECTED_EOF | codes::CONTEXT_CANCELED | codes::REQUEST_TIMEOUT => {
                ErrorClass::Transport
            }
            codes::BAD_REQUEST
            | codes::UNEXPECTED_INPUT
            | codes::UNAUTHORIZED
            | codes::ACCESS_DENIED
            | codes::NOT_FOUND
            | codes::ROUTE_NOT_FOUND
            | codes::METHOD_NOT_ALLOWED
            | codes::TOO_MANY_REQUESTS => ErrorClass::Request,
            _ => ErrorClass::Business,
        }
    }
}

impl PartialEq for RpcError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.meta == other.meta && self.reasons == other.reasons
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.meta.is_empty() {
            write!(f, " {}", Value::Object(self.meta.clone()))?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for RpcError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
    }
}

impl From<Transport> for RpcError {
    fn from(t: Transport) -> Self {
        RpcError::internal(t)
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// Recode an `unknown` error whose cause is a transport anomaly.
///
/// Errors with any other code are returned unchanged.
pub fn normalize(err: RpcError) -> RpcError {
    if err.code != codes::UNKNOWN {
        return err;
    }
    let Some(code) = err.cause().and_then(|c| transport_code(c)) else {
        return err;
    };
    RpcError {
        code: code.to_string(),
        ..err
    }
}

fn transport_code(cause: &(dyn StdError + 'static)) -> Option<&'static str> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(cause);
    while let Some(err) = current {
        if let Some(t) = err.downcast_ref::<Transport>() {
            return Some(match t {
                Transport::Eof => codes::EOF,
                Transport::UnexpectedEof => codes::UNEXPECTED_EOF,
                Transport::Canceled => codes::CONTEXT_CANCELED,
            });
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return Some(codes::UNEXPECTED_EOF);
            }
        }
        if let Some(json) = err.downcast_ref::<serde_json::Error>() {
            if json.is_eof() {
                return Some(codes::UNEXPECTED_EOF);
            }
        }
        if let Some(join) = err.downcast_ref::<tokio::task::JoinError>() {
            if join.is_cancelled() {
                return Some(codes::CONTEXT_CANCELED);
            }
        }
        if let Some(rpc) = err.downcast_ref::<RpcError>() {
            if let Some(code) = rpc.cause().and_then(|c| transport_code(c)) {
                return Some(code);
            }
        }
        current = err.source();
    }
    None
}
