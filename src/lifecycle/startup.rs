//! Daemon assembly.
//!
//! # Responsibilities
//! - Build every component from a validated configuration
//! - Prepare the backend and index its pools before consuming
//!
//! # Design Decisions
//! - Broker TLS material is loaded before the load balancer is touched,
//!   so a fatal TLS error leaves the host as it was

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::broker::StompBus;
use crate::config::{ApacheConfig, ConfigError, DaemonConfig, LoadBalancerKind, ServiceControlKind};
use crate::consumer::Consumer;
use crate::controller::{ControllerError, LoadBalancerController};
use crate::dispatch::Dispatcher;
use crate::load_balancer::apache::ApacheBackend;
use crate::load_balancer::service::{RecordingService, ServiceControl, SysVService};
use crate::load_balancer::BackendError;
use crate::routing::RoutingRules;

/// Errors that prevent the daemon from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend initialization failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Controller initialization failed: {0}")]
    Controller(#[from] ControllerError),
}

/// Service control selected by configuration.
pub fn build_service(config: &ApacheConfig) -> Arc<dyn ServiceControl> {
    match config.service_control {
        ServiceControlKind::SysV => Arc::new(SysVService::new(
            config.service.clone(),
            config.restore_security_labels,
        )),
        ServiceControlKind::None => Arc::new(RecordingService::new()),
    }
}

/// Build the backend and prepare the host for it.
pub async fn build_backend(
    config: &DaemonConfig,
    service: Arc<dyn ServiceControl>,
) -> Result<ApacheBackend, StartupError> {
    match config.load_balancer {
        LoadBalancerKind::Apache => {
            let rules = RoutingRules::from_config(&config.routing);
            let mut backend = ApacheBackend::new(
                config.apache.clone(),
                rules.pool_name_format().clone(),
                service,
            );
            backend.prepare().await?;
            Ok(backend)
        }
    }
}

/// Assemble a consumer over `bus` and a prepared backend.
pub async fn assemble<M>(
    config: &DaemonConfig,
    bus: M,
    backend: ApacheBackend,
) -> Result<Consumer<M, ApacheBackend>, StartupError>
where
    M: crate::broker::MessageBus,
{
    let controller = LoadBalancerController::new(backend).await?;
    let pools = controller.pools();
    tracing::info!(
        count = pools.len(),
        pools = ?pools.keys().collect::<Vec<_>>(),
        "Found pools"
    );
    let dispatcher = Dispatcher::new(RoutingRules::from_config(&config.routing), controller);
    Ok(Consumer::new(
        bus,
        dispatcher,
        Duration::from_secs(config.broker.update_interval_secs),
    ))
}

/// Load everything `build` would load before touching the host.
///
/// Covers broker TLS material, which validation alone does not read.
pub fn check(config: &DaemonConfig) -> Result<(), StartupError> {
    let bus = StompBus::from_config(&config.broker)?;
    tracing::debug!(client_id = %bus.client_id(), "Broker endpoints resolved");
    Ok(())
}

/// Build the production daemon: STOMP bus over an Apache backend.
pub async fn build(config: &DaemonConfig) -> Result<Consumer<StompBus, ApacheBackend>, StartupError> {
    let bus = StompBus::from_config(&config.broker)?;
    tracing::info!(client_id = %bus.client_id(), "Broker client configured");
    let service = build_service(&config.apache);
    let backend = build_backend(config, service).await?;
    assemble(config, bus, backend).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerHost, BrokerTlsConfig, TlsMode};

    fn config_with_tls(tls: BrokerTlsConfig) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.broker.hosts = vec![BrokerHost {
            host: "broker.example.com".into(),
            port: 61614,
            tls: Some(tls),
        }];
        config
    }

    #[test]
    fn test_check_rejects_unreadable_verified_tls() {
        let config = config_with_tls(BrokerTlsConfig {
            mode: TlsMode::Verified,
            cert_path: Some("/nonexistent/client.crt".into()),
            key_path: Some("/nonexistent/client.key".into()),
            ca_paths: vec!["/nonexistent/ca.pem".into()],
            fallback: false,
        });
        assert!(matches!(check(&config), Err(StartupError::Config(_))));
    }

    #[test]
    fn test_check_accepts_fallback_and_unverified_tls() {
        let fallback = config_with_tls(BrokerTlsConfig {
            fallback: true,
            ..BrokerTlsConfig::default()
        });
        assert!(check(&fallback).is_ok());

        let unverified = config_with_tls(BrokerTlsConfig {
            mode: TlsMode::Unverified,
            ..BrokerTlsConfig::default()
        });
        assert!(check(&unverified).is_ok());
    }
}
