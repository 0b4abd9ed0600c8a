//! Event dispatcher.
//!
//! # Responsibilities
//! - Map an event to pool and alias names
//! - Apply the gear size and endpoint type filters
//! - Drive the controller; log every decision
//!
//! # Data Flow
//! ```text
//! Event
//!     → gear size filter (skipped for reinit markers)
//!     → pool name from (app_name, namespace)
//!     → controller operation
//! ```
//!
//! # Design Decisions
//! - Holds no state between events beyond the controller's pool map
//! - Events for unknown pools are logged no-ops, except that an endpoint
//!   creates its application's pool

use thiserror::Error;
use crate::controller::{ControllerError, LoadBalancerController};
use crate::events::{Action, Event};
use crate::load_balancer::{LoadBalancerBackend, Member};
use crate::observability::metrics;
use crate::routing::RoutingRules;

/// Errors raised while handling one event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl DispatchError {
    /// Whether the message should be returned to the broker.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Controller(e) => e.is_model_error(),
        }
    }
}

/// Applies routing events to a controller.
pub struct Dispatcher<B> {
    rules: RoutingRules,
    controller: LoadBalancerController<B>,
}

impl<B: LoadBalancerBackend> Dispatcher<B> {
    pub fn new(rules: RoutingRules, controller: LoadBalancerController<B>) -> Self {
        Self { rules, controller }
    }

    pub fn controller(&self) -> &LoadBalancerController<B> {
        &self.controller
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    /// Handle one event.
    pub async fn handle(&mut self, event: &Event) -> Result<(), DispatchError> {
        metrics::record_event(event.action.as_str());

        if !event.action.is_reinit() && !self.rules.acts_on(event.gear_size.as_deref()) {
            tracing::debug!(
                action = %event.action,
                gear_size = ?event.gear_size,
                "Ignoring event for unhandled gear size"
            );
            return Ok(());
        }

        let result = self.apply(event).await;
        if let Err(e) = &result {
            tracing::warn!(
                action = %event.action,
                app_name = %event.app_name(),
                namespace = %event.namespace(),
                error = %e,
                "Failed to handle event"
            );
        }
        result
    }

    async fn apply(&mut self, event: &Event) -> Result<(), DispatchError> {
        let pool = self.rules.pool_name(event.app_name(), event.namespace());
        match event.action {
            Action::ReinitStart => self.controller.reinit_start().await?,
            Action::ReinitEnd => self.controller.reinit_end().await?,
            Action::DeleteApplication => {
                if self.controller.contains(&pool) {
                    tracing::info!(pool = %pool, "Deleting pool");
                    self.controller.delete_pool(&pool).await?;
                }
            }
            Action::AddPublicEndpoint => self.add_endpoint(event, &pool).await?,
            Action::RemovePublicEndpoint => self.remove_endpoint(event, &pool).await?,
            Action::AddAlias => {
                if self.has_pool(&pool, event) {
                    tracing::info!(pool = %pool, alias = %event.alias(), "Adding alias");
                    self.controller
                        .add_alias(&pool, event.alias(), event.public_address(), event.public_port)
                        .await?;
                }
            }
            Action::RemoveAlias => {
                if self.has_pool(&pool, event) {
                    tracing::info!(pool = %pool, alias = %event.alias(), "Deleting alias");
                    self.controller.delete_alias(&pool, event.alias()).await?;
                }
            }
            Action::AddSsl => {
                if self.has_pool(&pool, event) {
                    tracing::info!(pool = %pool, alias = %event.alias(), "Adding ssl configuration");
                    self.controller
                        .add_ssl(
                            &pool,
                            event.alias(),
                            event.ssl.as_deref().unwrap_or_default(),
                            event.private_key.as_deref().unwrap_or_default(),
                        )
                        .await?;
                }
            }
            Action::RemoveSsl => {
                if self.has_pool(&pool, event) {
                    tracing::info!(pool = %pool, alias = %event.alias(), "Deleting ssl configuration");
                    self.controller.remove_ssl(&pool, event.alias()).await?;
                }
            }
        }
        Ok(())
    }

    fn has_pool(&self, pool: &str, event: &Event) -> bool {
        let known = self.controller.contains(pool);
        if !known {
            tracing::debug!(pool = %pool, action = %event.action, "No such pool; ignoring");
        }
        known
    }

    async fn create_application(&mut self, event: &Event, pool: &str) -> Result<(), DispatchError> {
        tracing::info!(pool = %pool, "Creating new pool");
        self.controller.create_pool(pool).await?;

        let alias = self.rules.default_alias(event.app_name(), event.namespace());
        tracing::info!(pool = %pool, alias = %alias, "Adding default alias");
        self.controller.add_alias(pool, &alias, "", None).await?;
        Ok(())
    }

    async fn add_endpoint(&mut self, event: &Event, pool: &str) -> Result<(), DispatchError> {
        if !self.controller.contains(pool) {
            self.create_application(event, pool).await?;
        }

        if !self.rules.accepts_endpoint(&event.types) {
            tracing::info!(pool = %pool, types = ?event.types, "Ignoring endpoint with unhandled types");
            return Ok(());
        }
        let Some(member) = member_of(event) else {
            return Ok(());
        };
        tracing::info!(pool = %pool, member = %member, "Adding new member");
        self.controller.add_member(pool, member).await?;
        Ok(())
    }

    async fn remove_endpoint(&mut self, event: &Event, pool: &str) -> Result<(), DispatchError> {
        if !self.has_pool(pool, event) {
            return Ok(());
        }
        let Some(member) = member_of(event) else {
            return Ok(());
        };
        if self.controller.has_member(pool, &member).await? {
            tracing::info!(pool = %pool, member = %member, "Deleting member");
            self.controller.delete_member(pool, &member).await?;
        } else {
            tracing::info!(pool = %pool, member = %member, "No such member; ignoring");
        }
        Ok(())
    }
}

fn member_of(event: &Event) -> Option<Member> {
    match (event.public_address.as_deref(), event.public_port) {
        (Some(address), Some(port)) if !address.is_empty() => Some(Member::new(address, port)),
        _ => {
            tracing::warn!(action = %event.action, "Endpoint event without address and port");
            None
        }
    }
}
