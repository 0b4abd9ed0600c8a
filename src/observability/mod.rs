//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (message, event, reload and reconnect counters)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - RUST_LOG overrides the configured level
//! - Metrics are cheap no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
