//! Routing rules subsystem.
//!
//! # Data Flow
//! ```text
//! Decoded event (app_name, namespace, gear_size, types)
//!     → acts_on (gear size allow-list)
//!     → matcher.rs (pool name from format)
//!     → default alias from DNS prefix and cloud domain
//!     → accepts_endpoint (endpoint type filter)
//! ```
//!
//! # Design Decisions
//! - Rules are compiled once from RoutingConfig and never change
//! - Deterministic: same event always maps to the same pool and alias

pub mod matcher;

use std::collections::BTreeSet;
use crate::config::RoutingConfig;
use crate::routing::matcher::PoolNameFormat;

/// Gear size that matches every event.
pub const ALL_GEAR_PROFILES: &str = "all";

/// Compiled routing rules.
#[derive(Debug, Clone)]
pub struct RoutingRules {
    ha_dns_prefix: String,
    cloud_domain: String,
    pool_name_format: PoolNameFormat,
    endpoint_types: BTreeSet<String>,
    gear_profiles: BTreeSet<String>,
}

impl RoutingRules {
    /// Compile rules from configuration.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            ha_dns_prefix: config.ha_dns_prefix.clone(),
            cloud_domain: config.cloud_domain.clone(),
            pool_name_format: PoolNameFormat::new(config.pool_name_format.clone()),
            endpoint_types: config.endpoint_types.iter().cloned().collect(),
            gear_profiles: config.gear_profiles.iter().cloned().collect(),
        }
    }

    /// The compiled pool name format.
    pub fn pool_name_format(&self) -> &PoolNameFormat {
        &self.pool_name_format
    }

    /// Pool name for an application.
    pub fn pool_name(&self, app_name: &str, namespace: &str) -> String {
        self.pool_name_format.expand(app_name, namespace)
    }

    /// Alias every application receives when its pool is created.
    pub fn default_alias(&self, app_name: &str, namespace: &str) -> String {
        format!(
            "{}{}-{}.{}",
            self.ha_dns_prefix, app_name, namespace, self.cloud_domain
        )
    }

    /// Whether events for this gear size are acted upon.
    pub fn acts_on(&self, gear_size: Option<&str>) -> bool {
        if self.gear_profiles.contains(ALL_GEAR_PROFILES) {
            return true;
        }
        gear_size.is_some_and(|size| self.gear_profiles.contains(size))
    }

    /// Whether an endpoint with these type tags becomes a pool member.
    pub fn accepts_endpoint(&self, types: &[String]) -> bool {
        types.iter().any(|t| self.endpoint_types.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(gear_profiles: &[&str]) -> RoutingRules {
        let config = RoutingConfig {
            gear_profiles: gear_profiles.iter().map(|s| s.to_string()).collect(),
            ..RoutingConfig::default()
        };
        RoutingRules::from_config(&config)
    }

    #[test]
    fn test_default_alias() {
        let rules = rules(&["all"]);
        assert_eq!(rules.default_alias("blog", "alice"), "ha-blog-alice.example.com");
    }

    #[test]
    fn test_gear_filter_wildcard() {
        let rules = rules(&["all"]);
        assert!(rules.acts_on(Some("small")));
        assert!(rules.acts_on(None));
    }

    #[test]
    fn test_gear_filter_allow_list() {
        let rules = rules(&["medium", "large"]);
        assert!(rules.acts_on(Some("large")));
        assert!(!rules.acts_on(Some("small")));
        assert!(!rules.acts_on(None));
    }

    #[test]
    fn test_endpoint_type_filter() {
        let rules = rules(&["all"]);
        assert!(rules.accepts_endpoint(&["web_framework".into(), "load_balancer".into()]));
        assert!(!rules.accepts_endpoint(&["web_framework".into()]));
        assert!(!rules.accepts_endpoint(&[]));
    }
}
