//! Handler adapter: business functions to normalized handlers.
//!
//! # Responsibilities
//! - Decode the JSON request body into the declared request record
//! - Reject a body on methods that take no input
//! - Encode the response record (or list) as JSON
//!
//! # Design Decisions
//! - Four explicit constructors, one per function shape; shape errors are
//!   compile errors rather than registration-time checks
//! - Request and response records opt in through the [`RpcRecord`] marker
//! - JSON output is never HTML-escaped (serde_json does not escape `<>&`)

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{header, Extensions, HeaderMap, HeaderValue},
};
use futures_util::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::rpc::error::{codes, RpcError, RpcResult, Transport};
use crate::rpc::version::{MethodName, Version};

/// Request-scoped metadata handed to business functions.
#[derive(Debug, Clone)]
pub struct RpcContext {
    request_id: String,
    method: MethodName,
    requested: Version,
    resolved: Version,
    headers: HeaderMap,
    extensions: Extensions,
}

impl RpcContext {
    pub fn new(
        request_id: impl Into<String>,
        method: MethodName,
        requested: Version,
        resolved: Version,
        headers: HeaderMap,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method,
            requested,
            resolved,
            headers,
            extensions: Extensions::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &MethodName {
        &self.method
    }

    /// Version named in the request path.
    pub fn requested_version(&self) -> &Version {
        &self.requested
    }

    /// Concrete version the request was resolved to (`latest` is expanded).
    pub fn resolved_version(&self) -> &Version {
        &self.resolved
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Values attached by middleware (e.g. authentication state).
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// A single RPC invocation flowing through the middleware chain.
#[derive(Debug, Clone)]
pub struct Call {
    pub context: RpcContext,
    /// Fully buffered request body.
    pub body: Bytes,
}

/// Output of a normalized handler.
#[derive(Debug, Default)]
pub struct Reply {
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Reply {
    /// Success with no body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Success with an already encoded JSON body.
    pub fn json(body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            headers,
            body: Some(body.into()),
        }
    }
}

/// Normalized handler signature every route is reduced to.
pub type Handler = Arc<dyn Fn(Call) -> BoxFuture<'static, RpcResult<Reply>> + Send + Sync>;

/// Marker for request and response records (JSON objects).
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct GetUser { id: String }
/// impl RpcRecord for GetUser {}
/// ```
pub trait RpcRecord {}

/// Response shapes a handler may return: a record, a list of records, or a
/// list of strings.
pub trait RpcOutput: Send + 'static {
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T> RpcOutput for T
where
    T: RpcRecord + Serialize + Send + 'static,
{
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl<T> RpcOutput for Vec<T>
where
    T: RpcRecord + Serialize + Send + 'static,
{
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl RpcOutput for Vec<String> {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Adapt `(ctx) -> Result<(), RpcError>`.
pub fn from_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(RpcContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<()>> + Send + 'static,
{
    Arc::new(move |call: Call| {
        let fut = expect_empty(&call.body).map(|()| f(call.context));
        async move {
            fut?.await?;
            Ok(Reply::empty())
        }
        .boxed()
    })
}

/// Adapt `(ctx) -> Result<R, RpcError>`.
pub fn from_fn_output<F, Fut, R>(f: F) -> Handler
where
    F: Fn(RpcContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<R>> + Send + 'static,
    R: RpcOutput,
{
    Arc::new(move |call: Call| {
        let fut = expect_empty(&call.body).map(|()| f(call.context));
        async move { encode(&fut?.await?) }.boxed()
    })
}

/// Adapt `(ctx, request) -> Result<(), RpcError>`.
pub fn from_fn_input<F, Fut, Req>(f: F) -> Handler
where
    F: Fn(RpcContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<()>> + Send + 'static,
    Req: RpcRecord + DeserializeOwned,
{
    Arc::new(move |call: Call| {
        let fut = decode::<Req>(&call.body).map(|req| f(call.context, req));
        async move {
            fut?.await?;
            Ok(Reply::empty())
        }
        .boxed()
    })
}

/// Adapt `(ctx, request) -> Result<R, RpcError>`.
pub fn from_fn_input_output<F, Fut, Req, R>(f: F) -> Handler
where
    F: Fn(RpcContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<R>> + Send + 'static,
    Req: RpcRecord + DeserializeOwned,
    R: RpcOutput,
{
    Arc::new(move |call: Call| {
        let fut = decode::<Req>(&call.body).map(|req| f(call.context, req));
        async move { encode(&fut?.await?) }.boxed()
    })
}

fn expect_empty(body: &Bytes) -> RpcResult<()> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(RpcError::bad_request().with_reason(RpcError::new(codes::UNEXPECTED_REQUEST_BODY)))
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> RpcResult<T> {
    if body.is_empty() {
        return Err(RpcError::bad_request().with_reason(RpcError::new(codes::MISSING_REQUEST_BODY)));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Transport::Eof.into());
    }
    serde_json::from_slice(body).map_err(|e| {
        if e.is_eof() {
            // Truncated document; recoded to `unexpected_eof` on the way out.
            RpcError::internal(e)
        } else {
            RpcError::bad_request().with_reason(
                RpcError::new(codes::INVALID_REQUEST_BODY).with_meta("description", e.to_string()),
            )
        }
    })
}

fn encode<R: RpcOutput>(out: &R) -> RpcResult<Reply> {
    out.to_json()
        .map(Reply::json)
        .map_err(|e| RpcError::new(codes::COERCION_ERROR).with_cause(e))
}
