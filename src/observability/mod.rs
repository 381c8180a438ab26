//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every RPC call:
//!     → logging.rs (span with request ID, method, versions, duration)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows from the HTTP layer into the RPC context
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
