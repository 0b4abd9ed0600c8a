//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Broker TLS material → Backend prepare → Controller index
//!     → Dispatcher → Consumer
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Consumer finishes current message → Disconnect → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: broker TLS is checked before the service is stopped
//! - Shutdown never interrupts a message in flight

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
