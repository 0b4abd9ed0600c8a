//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failed pass over the broker endpoints
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → next pass
//! ```
//!
//! # Design Decisions
//! - No attempt cap; the daemon is useless without a broker
//! - Jitter keeps daemons on many hosts from reconnecting in lockstep

pub mod backoff;
