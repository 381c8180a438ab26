//! Versioned RPC service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ dispatcher ──▶ resolved table (version)
//!                     (request id,     (verb, path,       │
//!                      body limit,      status header)     ▼
//!                      timeout)                    global → auth → schema
//!                                                   → route → handler
//!     Client Response
//!     ◀────────────── JSON reply or { code, meta, reasons }
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use versioned_rpc::builtin::register_builtin;
use versioned_rpc::config::{load_config, validate_config, ConfigError, ServiceConfig};
use versioned_rpc::lifecycle::startup;
use versioned_rpc::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "versioned-rpc", version, about = "Versioned RPC service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

fn load(cli: &Cli) -> Result<ServiceConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "versioned-rpc starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        auth_mode = ?config.auth.mode,
        "Configuration loaded"
    );

    let mut service = startup::configured_service(&config);
    if let Err(e) = register_builtin(&mut service) {
        tracing::error!(error = %e, "Route registration failed");
        return ExitCode::FAILURE;
    }

    if let Err(e) = startup::serve(config, service).await {
        tracing::error!(error = %e, "Server terminated with an error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
