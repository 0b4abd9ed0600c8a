//! Routing daemon library: keeps load balancer configuration in sync with
//! platform routing events.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod controller;
pub mod dispatch;
pub mod events;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::schema::DaemonConfig;
pub use consumer::Consumer;
pub use lifecycle::Shutdown;
