//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool, health monitor and dispatcher produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr (fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through dispatch logs
//! - Metrics calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
