//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the authentication and logging middleware from configuration
//! - Start the metrics exporter when enabled
//! - Bind the listener and serve until a termination signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only once the registry is frozen)

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{AuthMode, ServiceConfig};
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::{logging, metrics};
use crate::rpc::{Middleware, Service};
use crate::security::auth::{
    optional_authentication, require_authenticated, AnonymousAuthenticator, Authenticator,
    BearerAuthenticator,
};
use crate::security::secrets::{ChainedSecrets, EnvSecrets, SecretProvider, StaticSecrets};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Secret provider described by the configuration: the `[secrets]` table,
/// then environment variables when a prefix is set.
pub fn secret_provider(config: &ServiceConfig) -> Arc<dyn SecretProvider> {
    let configured: Arc<dyn SecretProvider> = Arc::new(StaticSecrets::from(config.secrets.clone()));
    match &config.auth.env_prefix {
        Some(prefix) => Arc::new(ChainedSecrets::new(vec![
            configured,
            Arc::new(EnvSecrets::new(prefix.clone())),
        ])),
        None => configured,
    }
}

/// Authentication middleware for the configured mode.
pub fn auth_middleware(config: &ServiceConfig) -> Middleware {
    match config.auth.mode {
        AuthMode::Anonymous => optional_authentication(Arc::new(AnonymousAuthenticator)),
        AuthMode::Bearer => {
            let authenticator: Arc<dyn Authenticator> = Arc::new(BearerAuthenticator::new(
                secret_provider(config),
                config.auth.secret_id.clone(),
            ));
            require_authenticated(authenticator)
        }
    }
}

/// A service pre-wired with request logging and the configured auth.
pub fn configured_service(config: &ServiceConfig) -> Service {
    let mut service = Service::new();
    service
        .use_middleware(logging::request_logging((&config.observability).into()))
        .set_auth(auth_middleware(config));
    service
}

/// Serve `service` until SIGINT/SIGTERM.
pub async fn serve(config: ServiceConfig, service: Service) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let address = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(address)?;
    }

    let dispatcher = service.into_dispatcher();

    let address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, dispatcher);
    let signal = shutdown.subscribe();

    let serving = tokio::spawn(server.run(listener, signal));
    signals::trigger_on_signal(&shutdown).await;

    match serving.await {
        Ok(result) => result.map_err(StartupError::from),
        Err(e) => Err(StartupError::Serve(std::io::Error::other(e))),
    }
}
