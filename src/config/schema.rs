//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Root configuration for the routing daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Load balancer technology managed by this daemon.
    pub load_balancer: LoadBalancerKind,

    /// Message broker connection settings.
    pub broker: BrokerConfig,

    /// Pool naming and event filtering.
    pub routing: RoutingConfig,

    /// Apache backend settings.
    pub apache: ApacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Supported load balancer technologies.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerKind {
    #[default]
    Apache,
}

/// Message broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Ordered list of broker endpoints; tried first to last.
    pub hosts: Vec<BrokerHost>,

    /// Login sent with every CONNECT frame.
    pub user: String,

    /// Passcode sent with every CONNECT frame.
    pub password: String,

    /// Destination to subscribe to.
    pub destination: String,

    /// Bounded wait for one message, in seconds.
    pub update_interval_secs: u64,

    /// Timeout for establishing a single broker connection, in seconds.
    pub connect_timeout_secs: u64,

    /// Base delay between failed passes over the host list, in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay between failed passes over the host list, in milliseconds.
    pub reconnect_max_delay_ms: u64,

    /// STOMP client id. Defaults to `<hostname>-<pid>`.
    pub client_id: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            hosts: vec![BrokerHost::default()],
            user: "routinginfo".to_string(),
            password: "routinginfopasswd".to_string(),
            destination: "/topic/routinginfo".to_string(),
            update_interval_secs: 5,
            connect_timeout_secs: 10,
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 30_000,
            client_id: None,
        }
    }
}

/// One broker endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerHost {
    /// Host name or IP address.
    pub host: String,

    /// STOMP port.
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Optional TLS settings for this endpoint.
    #[serde(default)]
    pub tls: Option<BrokerTlsConfig>,
}

impl Default for BrokerHost {
    fn default() -> Self {
        Self {
            host: "activemq.example.com".to_string(),
            port: default_broker_port(),
            tls: None,
        }
    }
}

fn default_broker_port() -> u16 {
    61613
}

/// TLS configuration for a broker endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BrokerTlsConfig {
    /// `verified` requires client certificate, key and CA files;
    /// `unverified` encrypts without checking the broker certificate.
    #[serde(default)]
    pub mode: TlsMode,

    /// Path to the client certificate (PEM).
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// Path to the client private key (PEM).
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// CA bundles trusted for the broker certificate (PEM).
    #[serde(default)]
    pub ca_paths: Vec<PathBuf>,

    /// Downgrade to `unverified` instead of failing startup when the
    /// verified material is unusable.
    #[serde(default)]
    pub fallback: bool,
}

/// TLS verification mode for a broker endpoint.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    Verified,
    Unverified,
}

/// Pool naming and event filtering.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Prefix for the default alias of every application.
    pub ha_dns_prefix: String,

    /// Domain appended to default aliases.
    pub cloud_domain: String,

    /// Pool name format; `%a` is the application, `%n` the namespace.
    pub pool_name_format: String,

    /// Endpoint type tags that become pool members.
    pub endpoint_types: Vec<String>,

    /// Gear sizes acted upon; `all` matches every size.
    pub gear_profiles: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            ha_dns_prefix: "ha-".to_string(),
            cloud_domain: "example.com".to_string(),
            pool_name_format: "pool_ose_%a_%n".to_string(),
            endpoint_types: vec!["load_balancer".to_string()],
            gear_profiles: vec!["all".to_string()],
        }
    }
}

/// Apache backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApacheConfig {
    /// Apache configuration directory that receives the include anchor.
    pub conf_dir: PathBuf,

    /// Name of the managed subdirectory under `conf_dir`.
    pub managed_subdir: String,

    /// Service name passed to the service control commands.
    pub service: String,

    /// How the service is controlled.
    pub service_control: ServiceControlKind,

    /// Run `restorecon` after changing the managed directory.
    pub restore_security_labels: bool,

    /// Stop and disable the service before the first reinitialization.
    pub stop_on_startup: bool,

    /// Remove the managed directory at startup.
    pub clean_on_startup: bool,

    /// Port of the generated virtual hosts.
    pub ssl_port: u16,

    /// Parent directory for staging roots.
    pub tmp_dir: PathBuf,

    /// File name prefix for staging roots.
    pub tmp_prefix: String,

    /// Certificate used when an alias has none.
    pub default_cert_path: PathBuf,

    /// Key used when an alias has none.
    pub default_key_path: PathBuf,

    /// `SSLCipherSuite` written into each virtual host.
    pub cipher_suite: String,
}

impl Default for ApacheConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/httpd/conf.d"),
            managed_subdir: "ose_routing".to_string(),
            service: "httpd".to_string(),
            service_control: ServiceControlKind::SysV,
            restore_security_labels: true,
            stop_on_startup: true,
            clean_on_startup: true,
            ssl_port: 443,
            tmp_dir: PathBuf::from("/tmp"),
            tmp_prefix: "ose-routing-".to_string(),
            default_cert_path: PathBuf::from("/etc/pki/tls/certs/localhost.crt"),
            default_key_path: PathBuf::from("/etc/pki/tls/private/localhost.key"),
            cipher_suite: "kEECDH:+kEECDH+SHA:kEDH:+kEDH+SHA:+kEDH+CAMELLIA:kECDH:+kECDH+SHA:kRSA:+kRSA+SHA:+kRSA+CAMELLIA:!aNULL:!eNULL:!SSLv2:!RC4:!DES:!EXP:!SEED:!IDEA:+3DES".to_string(),
        }
    }
}

/// Service control strategy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceControlKind {
    /// `service`, `chkconfig` and `restorecon` commands.
    SysV,
    /// Log the calls without running anything.
    None,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_install() {
        let config = DaemonConfig::default();
        assert_eq!(config.broker.destination, "/topic/routinginfo");
        assert_eq!(config.broker.hosts[0].port, 61613);
        assert_eq!(config.routing.pool_name_format, "pool_ose_%a_%n");
        assert_eq!(config.routing.gear_profiles, vec!["all"]);
        assert_eq!(config.apache.ssl_port, 443);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            load_balancer = "apache"

            [routing]
            cloud_domain = "apps.example.org"

            [[broker.hosts]]
            host = "mq1.example.org"

            [[broker.hosts]]
            host = "mq2.example.org"
            port = 61614
            tls = { mode = "verified", cert_path = "/etc/mq/client.pem", key_path = "/etc/mq/client.key", ca_paths = ["/etc/mq/ca.pem"], fallback = true }
            "#,
        )
        .unwrap();

        assert_eq!(config.routing.cloud_domain, "apps.example.org");
        assert_eq!(config.routing.ha_dns_prefix, "ha-");
        assert_eq!(config.broker.hosts.len(), 2);
        assert_eq!(config.broker.hosts[0].port, 61613);
        let tls = config.broker.hosts[1].tls.as_ref().unwrap();
        assert_eq!(tls.mode, TlsMode::Verified);
        assert!(tls.fallback);
    }
}
