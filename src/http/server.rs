//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: every path falls through to the RPC dispatcher
//! - Wire up middleware (request ID, tracing)
//! - Buffer request bodies under the configured size limit
//! - Bound each call by the configured request timeout
//! - Serve with graceful shutdown and a drain deadline

use std::future::IntoFuture;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Request},
    response::Response,
    Router,
};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::ShutdownSignal;
use crate::rpc::dispatch::error_response;
use crate::rpc::error::{codes, Transport};
use crate::rpc::{Dispatcher, RpcError, RpcResult};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

/// HTTP front of the RPC dispatcher.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
}

impl HttpServer {
    pub fn new(config: ServiceConfig, dispatcher: Dispatcher) -> Self {
        let state = AppState {
            dispatcher,
            max_body_bytes: config.limits.max_body_bytes,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };
        let router = Self::build_router(state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outermost-last: the request ID is assigned before the
    /// trace span opens and copied onto the response on the way out.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(rpc_handler)
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then drain in-flight calls
    /// for at most `timeouts.shutdown_grace_secs`.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let serving = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.clone().recv())
            .into_future();
        let deadline = async move {
            shutdown.recv().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = serving => result?,
            _ = deadline => {
                tracing::warn!(grace_secs = grace.as_secs(), "Drain deadline reached, dropping open connections");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Fallback handler: buffer the body and hand the call to the dispatcher.
async fn rpc_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let timeout = state.request_timeout;
    match tokio::time::timeout(timeout, handle(&state, request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs_f64(), "RPC call timed out");
            error_response(
                RpcError::new(codes::REQUEST_TIMEOUT).with_meta("timeout_ms", timeout.as_millis() as u64),
            )
        }
    }
}

async fn handle(state: &AppState, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    if content_length(&parts.headers).is_some_and(|len| len > state.max_body_bytes) {
        return error_response(body_too_large(state.max_body_bytes));
    }

    let bytes = match read_body(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => return error_response(err),
    };

    state
        .dispatcher
        .dispatch(Request::from_parts(parts, bytes))
        .await
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn body_too_large(limit: usize) -> RpcError {
    RpcError::bad_request().with_reason(
        RpcError::new(codes::REQUEST_BODY_TOO_LARGE).with_meta("limit", limit as u64),
    )
}

/// Collect the body, failing as soon as it grows past `limit`.
async fn read_body(body: Body, limit: usize) -> RpcResult<Bytes> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::debug!(error = %e, "Failed to read request body");
            RpcError::internal(Transport::UnexpectedEof)
        })?;
        if buf.len() + chunk.len() > limit {
            return Err(body_too_large(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}
