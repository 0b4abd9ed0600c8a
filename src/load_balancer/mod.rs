//! Load balancer backend subsystem.
//!
//! # Data Flow
//! ```text
//! Controller operation (pool / member / alias / certificate)
//!     → LoadBalancerBackend implementation (apache.rs)
//!     → render.rs (record text)
//!     → active root (permanent, or staging during reinit)
//!     → service.rs (reload when content changed)
//!
//! Reinitialization:
//!     reinit_start → staging.rs allocates a staging root
//!     ... mutations land in staging ...
//!     reinit_end → staging.rs diffs and promotes → one reload
//! ```
//!
//! # Design Decisions
//! - One file per pool and one per alias; a mutation touches one file
//! - Records are re-read from disk on every query; nothing is cached
//! - Record text is deterministic so unchanged content diffs equal

pub mod apache;
pub mod render;
pub mod service;
pub mod staging;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use async_trait::async_trait;
use thiserror::Error;

/// One backend endpoint inside a pool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Member {
    pub address: String,
    pub port: u16,
}

impl Member {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Member {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| BackendError::InvalidMember(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| BackendError::InvalidMember(s.to_string()))?;
        if address.is_empty() {
            return Err(BackendError::InvalidMember(s.to_string()));
        }
        Ok(Self::new(address, port))
    }
}

/// Public endpoint a pool contributes to an alias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parse the `address[:port]` form written into alias records.
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((address, "")) => Self::new(address, None),
            Some((address, port)) => match port.parse() {
                Ok(port) => Self::new(address, Some(port)),
                Err(_) => Self::new(s, None),
            },
            None => Self::new(s, None),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.address, port),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Errors raised by a load balancer backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A record that must exist is missing.
    #[error("No configuration found for {0}")]
    ConfigNotFound(String),

    /// A member string could not be parsed.
    #[error("Invalid pool member: {0}")]
    InvalidMember(String),

    /// A pool or alias name cannot be used as a record name.
    #[error("Invalid record name: {0:?}")]
    InvalidName(String),

    /// Filesystem failure.
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A service control command failed.
    #[error("Service control failed: {0}")]
    Service(String),
}

impl BackendError {
    /// Build a closure that wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// Whether the error is a model inconsistency rather than an
    /// environmental failure.
    pub fn is_model_error(&self) -> bool {
        matches!(self, Self::ConfigNotFound(_))
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Persisted configuration of one load balancer technology.
///
/// Every mutation is written to disk before it returns. Mutations target the
/// staging root between `reinit_start` and `reinit_end`, the permanent root
/// otherwise.
#[async_trait]
pub trait LoadBalancerBackend: Send + Sync {
    /// Create an empty pool record, overwriting any existing one.
    async fn create_pool(&mut self, name: &str) -> BackendResult<()>;

    /// Remove a pool record. No-op if absent.
    async fn delete_pool(&mut self, name: &str) -> BackendResult<()>;

    /// Names of all persisted pools.
    async fn list_pool_names(&self) -> BackendResult<BTreeSet<String>>;

    /// Members of a pool. Fails with `ConfigNotFound` if the pool has no record.
    async fn list_pool_members(&self, name: &str) -> BackendResult<BTreeSet<Member>>;

    /// Merge members into a pool.
    async fn add_members(&mut self, name: &str, members: &[Member]) -> BackendResult<()>;

    /// Remove members from a pool; absent members are ignored.
    async fn remove_members(&mut self, name: &str, members: &[Member]) -> BackendResult<()>;

    /// Names of all persisted aliases.
    async fn list_pool_aliases(&self) -> BackendResult<BTreeSet<String>>;

    /// Endpoint each pool contributes to an alias.
    async fn list_alias_endpoints(&self, alias: &str) -> BackendResult<BTreeMap<String, Endpoint>>;

    /// Add or replace a pool's public endpoint in an alias.
    /// No-op when `public_address` is empty.
    async fn add_alias_endpoint(
        &mut self,
        pool: &str,
        alias: &str,
        public_address: &str,
        public_port: Option<u16>,
    ) -> BackendResult<()>;

    /// Remove a pool's endpoint from an alias; the alias goes when it is empty.
    async fn remove_alias_endpoint(&mut self, pool: &str, alias: &str) -> BackendResult<()>;

    /// Install certificate material for an alias and activate it.
    async fn add_certificate(
        &mut self,
        alias: &str,
        certificate: &str,
        private_key: &str,
    ) -> BackendResult<()>;

    /// Remove an alias's certificate material and fall back to the default.
    async fn remove_certificate(&mut self, alias: &str) -> BackendResult<()>;

    /// Start building a fresh configuration in a staging root.
    async fn reinit_start(&mut self) -> BackendResult<()>;

    /// Commit the staging root if it differs from the permanent one.
    async fn reinit_end(&mut self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_roundtrip_text() {
        let member: Member = "10.0.0.5:8080".parse().unwrap();
        assert_eq!(member, Member::new("10.0.0.5", 8080));
        assert_eq!(member.to_string(), "10.0.0.5:8080");
    }

    #[test]
    fn test_member_rejects_garbage() {
        assert!("10.0.0.5".parse::<Member>().is_err());
        assert!("10.0.0.5:http".parse::<Member>().is_err());
        assert!(":80".parse::<Member>().is_err());
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(Endpoint::parse("1.2.3.4:80"), Endpoint::new("1.2.3.4", Some(80)));
        assert_eq!(Endpoint::parse("1.2.3.4:"), Endpoint::new("1.2.3.4", None));
        assert_eq!(Endpoint::parse("node1"), Endpoint::new("node1", None));
    }

    #[test]
    fn test_model_error_classification() {
        assert!(BackendError::ConfigNotFound("p".into()).is_model_error());
        assert!(!BackendError::Service("reload".into()).is_model_error());
        assert!(!BackendError::InvalidName("../etc".into()).is_model_error());
    }
}
