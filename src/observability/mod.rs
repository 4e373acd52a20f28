//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms via the `metrics` facade)
//!
//! Consumers:
//!     → fmt subscriber on stdout
//!     → Prometheus scrape endpoint (demo binary, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields, connection and session ids on every event
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
