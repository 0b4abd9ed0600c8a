//! Pool controller.
//!
//! # Responsibilities
//! - Index the pools the backend has persisted
//! - Bind pool names to backend operations
//! - Reject operations on pools it does not know
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → LoadBalancerController (pool map: name → Pool)
//!     → LoadBalancerBackend (records on disk)
//!
//! reinit_start / reinit_end
//!     → backend switches roots
//!     → pool map re-indexed from the now-active root
//! ```
//!
//! # Design Decisions
//! - A pool is a name handle; members and aliases are re-read on every query
//! - The map follows the root mutations target, so a reinit that starts from
//!   an empty staging root starts from an empty map
//! - A pool whose record has vanished from disk is dropped from the map, so
//!   the next event for it starts over from pool creation

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use crate::load_balancer::{BackendError, BackendResult, LoadBalancerBackend, Member};

/// Errors raised by the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The pool is not in the controller's map.
    #[error("Pool not found: {0}")]
    UnknownPool(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ControllerError {
    /// Whether the error reflects a model inconsistency that the platform
    /// may resolve by redelivering the event.
    pub fn is_model_error(&self) -> bool {
        match self {
            Self::UnknownPool(_) => true,
            Self::Backend(e) => e.is_model_error(),
        }
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Handle on one persisted pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    name: String,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Pool map over a load balancer backend.
pub struct LoadBalancerController<B> {
    backend: B,
    pools: BTreeMap<String, Pool>,
}

impl<B: LoadBalancerBackend> LoadBalancerController<B> {
    /// Create a controller and index the backend's pools.
    pub async fn new(backend: B) -> ControllerResult<Self> {
        let mut controller = Self {
            backend,
            pools: BTreeMap::new(),
        };
        controller.reindex().await?;
        tracing::info!(pools = controller.pools.len(), "Routing controller initialized");
        Ok(controller)
    }

    /// Known pools by name.
    pub fn pools(&self) -> &BTreeMap<String, Pool> {
        &self.pools
    }

    pub fn contains(&self, pool: &str) -> bool {
        self.pools.contains_key(pool)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn reindex(&mut self) -> ControllerResult<()> {
        let names = self.backend.list_pool_names().await?;
        self.pools = names.into_iter().map(|n| (n.clone(), Pool::new(n))).collect();
        tracing::debug!(pools = self.pools.len(), "Indexed pools");
        Ok(())
    }

    fn pool(&self, name: &str) -> ControllerResult<&Pool> {
        self.pools
            .get(name)
            .ok_or_else(|| ControllerError::UnknownPool(name.to_string()))
    }

    /// Drop `pool` from the map when the backend no longer has its record.
    fn forget_missing<T>(&mut self, pool: &str, result: BackendResult<T>) -> ControllerResult<T> {
        if let Err(BackendError::ConfigNotFound(_)) = &result {
            if self.pools.remove(pool).is_some() {
                tracing::warn!(pool = %pool, "Pool record missing on disk; forgetting pool");
            }
        }
        Ok(result?)
    }

    pub async fn create_pool(&mut self, name: &str) -> ControllerResult<()> {
        self.backend.create_pool(name).await?;
        self.pools.insert(name.to_string(), Pool::new(name));
        Ok(())
    }

    /// Delete a pool and withdraw it from every alias it contributes to.
    pub async fn delete_pool(&mut self, name: &str) -> ControllerResult<()> {
        self.pool(name)?;
        for alias in self.aliases(name).await? {
            self.backend.remove_alias_endpoint(name, &alias).await?;
        }
        self.backend.delete_pool(name).await?;
        self.pools.remove(name);
        Ok(())
    }

    pub async fn members(&self, pool: &str) -> ControllerResult<BTreeSet<Member>> {
        let pool = self.pool(pool)?;
        Ok(self.backend.list_pool_members(pool.name()).await?)
    }

    /// Aliases whose endpoint map names the pool.
    pub async fn aliases(&self, pool: &str) -> ControllerResult<BTreeSet<String>> {
        let pool = self.pool(pool)?;
        let mut aliases = BTreeSet::new();
        for alias in self.backend.list_pool_aliases().await? {
            let endpoints = self.backend.list_alias_endpoints(&alias).await?;
            if endpoints.contains_key(pool.name()) {
                aliases.insert(alias);
            }
        }
        Ok(aliases)
    }

    /// Whether `member` is in the pool's record.
    pub async fn has_member(&mut self, pool: &str, member: &Member) -> ControllerResult<bool> {
        self.pool(pool)?;
        let result = self.backend.list_pool_members(pool).await;
        let members = self.forget_missing(pool, result)?;
        Ok(members.contains(member))
    }

    pub async fn add_member(&mut self, pool: &str, member: Member) -> ControllerResult<()> {
        self.pool(pool)?;
        let result = self.backend.add_members(pool, &[member]).await;
        self.forget_missing(pool, result)
    }

    pub async fn delete_member(&mut self, pool: &str, member: &Member) -> ControllerResult<()> {
        self.pool(pool)?;
        let result = self
            .backend
            .remove_members(pool, std::slice::from_ref(member))
            .await;
        self.forget_missing(pool, result)
    }

    pub async fn add_alias(
        &mut self,
        pool: &str,
        alias: &str,
        public_address: &str,
        public_port: Option<u16>,
    ) -> ControllerResult<()> {
        self.pool(pool)?;
        self.backend
            .add_alias_endpoint(pool, alias, public_address, public_port)
            .await?;
        Ok(())
    }

    pub async fn delete_alias(&mut self, pool: &str, alias: &str) -> ControllerResult<()> {
        self.pool(pool)?;
        self.backend.remove_alias_endpoint(pool, alias).await?;
        Ok(())
    }

    pub async fn add_ssl(
        &mut self,
        pool: &str,
        alias: &str,
        certificate: &str,
        private_key: &str,
    ) -> ControllerResult<()> {
        self.pool(pool)?;
        self.backend
            .add_certificate(alias, certificate, private_key)
            .await?;
        Ok(())
    }

    pub async fn remove_ssl(&mut self, pool: &str, alias: &str) -> ControllerResult<()> {
        self.pool(pool)?;
        self.backend.remove_certificate(alias).await?;
        Ok(())
    }

    pub async fn reinit_start(&mut self) -> ControllerResult<()> {
        self.backend.reinit_start().await?;
        self.reindex().await
    }

    /// Forward to the backend and re-index, also after a failed commit since
    /// the backend always returns to its permanent root.
    pub async fn reinit_end(&mut self) -> ControllerResult<()> {
        let result = self.backend.reinit_end().await;
        self.reindex().await?;
        Ok(result?)
    }
}
