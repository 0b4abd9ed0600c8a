//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → handed by value to broker, dispatcher and backend at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApacheConfig, BrokerConfig, BrokerHost, BrokerTlsConfig, DaemonConfig, LoadBalancerKind,
    LogFormat, ObservabilityConfig, RoutingConfig, ServiceControlKind, TlsMode,
};
