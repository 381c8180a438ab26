//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Request-logging middleware: span per RPC call with method, versions
//!   and duration; error normalization; severity per error class
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level from `RUST_LOG` when set, otherwise from config
//! - Canceled calls are informational unless configured otherwise

use std::time::Instant;

use tracing::{field, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::observability::metrics;
use crate::rpc::error::{codes, normalize, ErrorClass, RpcError};
use crate::rpc::handler::Call;
use crate::rpc::middleware::{self, Middleware, Next};

/// Install the global subscriber. Returns an error if one is already set.
pub fn init(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("versioned_rpc={level},tower_http={level}", level = config.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}

/// How the request-logging middleware grades failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPolicy {
    /// Log `context_canceled` as an error instead of an info event.
    pub canceled_is_error: bool,
}

impl From<&ObservabilityConfig> for LoggingPolicy {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            canceled_is_error: config.canceled_is_error,
        }
    }
}

/// Global middleware recording each call in a span and in metrics.
///
/// Errors leave this layer normalized (`eof`, `unexpected_eof`,
/// `context_canceled`).
pub fn request_logging(policy: LoggingPolicy) -> Middleware {
    middleware::from_fn(move |call: Call, next: Next| {
        let ctx = &call.context;
        let method = ctx.method().to_string();
        let version = ctx.requested_version().to_string();
        let span = tracing::info_span!(
            "rpc",
            request_id = %ctx.request_id(),
            method = %method,
            version = %version,
            resolved = %ctx.resolved_version(),
            duration_ms = field::Empty,
            code = field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = next.run(call).await.map_err(normalize);
            let span = tracing::Span::current();
            span.record("duration_ms", start.elapsed().as_millis() as u64);

            let code = match &result {
                Ok(_) => {
                    span.record("code", "ok");
                    tracing::debug!("RPC call completed");
                    "ok"
                }
                Err(err) => {
                    span.record("code", err.code());
                    log_failure(err, policy);
                    err.code()
                }
            };
            metrics::record_call(&method, &version, code, start);
            result
        }
        .instrument(span)
    })
}

fn log_failure(err: &RpcError, policy: LoggingPolicy) {
    match err.class() {
        ErrorClass::Internal => tracing::error!(error = %err, "RPC call failed"),
        ErrorClass::Transport if err.code() == codes::CONTEXT_CANCELED => {
            if policy.canceled_is_error {
                tracing::error!(error = %err, "RPC call canceled");
            } else {
                tracing::info!("RPC call canceled");
            }
        }
        ErrorClass::Transport => tracing::warn!(error = %err, "RPC call transport failure"),
        ErrorClass::Request | ErrorClass::Business => {
            tracing::info!(error = %err, "RPC call returned an error")
        }
    }
}
