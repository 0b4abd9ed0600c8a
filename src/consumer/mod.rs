//! Message consumer.
//!
//! # Responsibilities
//! - Keep a broker subscription alive
//! - Decode and dispatch each message, then ACK or NACK it
//! - Stop between messages when shutdown is signalled
//!
//! # Data Flow
//! ```text
//! Disconnected ──connect──▶ Subscribed
//!     ▲                        │
//!     │ broker error           ▼
//!     └──────────────── Receiving ⇄ Processing
//!
//! Processing:
//!     no message-id   → drop
//!     decode error    → ACK
//!     dispatched      → ACK
//!     model error     → NACK
//!     other error     → ACK (logged)
//! ```
//!
//! # Design Decisions
//! - One message at a time; receive is bounded by the update interval
//! - A failed ACK or NACK is a transport failure and triggers a reconnect

use std::time::Duration;
use tokio::sync::broadcast;

use crate::broker::{BrokerError, Message, MessageBus};
use crate::dispatch::Dispatcher;
use crate::events;
use crate::load_balancer::LoadBalancerBackend;
use crate::observability::metrics;

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Nacked,
    /// No message-id; nothing could be sent back.
    Dropped,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Nacked => "nacked",
            Self::Dropped => "dropped",
        }
    }
}

/// Receive loop over a message bus.
pub struct Consumer<M, B> {
    bus: M,
    dispatcher: Dispatcher<B>,
    update_interval: Duration,
}

impl<M: MessageBus, B: LoadBalancerBackend> Consumer<M, B> {
    pub fn new(bus: M, dispatcher: Dispatcher<B>, update_interval: Duration) -> Self {
        Self {
            bus,
            dispatcher,
            update_interval,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    pub fn bus(&self) -> &M {
        &self.bus
    }

    /// Run until shutdown is signalled.
    ///
    /// Fails only when the bus gives up connecting, which it does for
    /// configuration problems rather than unreachable brokers.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), BrokerError> {
        tracing::info!("Connecting to broker");
        tokio::select! {
            result = self.bus.connect() => result?,
            _ = shutdown.recv() => {
                tracing::info!("Shutdown requested before broker connection");
                return Ok(());
            }
        }

        tracing::info!("Listening");
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => break,
                received = tokio::time::timeout(self.update_interval, self.bus.receive()) => received,
            };

            let result = match received {
                Err(_elapsed) => continue,
                Ok(Ok(message)) => self.process(&message).await.map(|_| ()),
                Ok(Err(e)) => Err(e),
            };

            if let Err(e) = result {
                tracing::warn!(error = %e, "Connection to broker is gone, reconnecting");
                metrics::record_reconnect();
                tokio::select! {
                    result = self.bus.connect() => result?,
                    _ = shutdown.recv() => break,
                }
            }
        }

        self.bus.disconnect().await;
        tracing::info!("Consumer stopped");
        Ok(())
    }

    /// Handle one message and settle it with the broker.
    pub async fn process(&mut self, message: &Message) -> Result<Disposition, BrokerError> {
        let Some(message_id) = message.message_id() else {
            tracing::warn!(headers = ?message.headers, body = %message.body, "Got message without message-id");
            metrics::record_message(Disposition::Dropped.as_str());
            return Ok(Disposition::Dropped);
        };
        tracing::debug!(message_id = %message_id, body = %message.body, "Received message");

        let disposition = match events::decode(&message.body) {
            Err(e) => {
                tracing::warn!(message_id = %message_id, error = %e, "Could not parse message; acknowledging");
                Disposition::Acked
            }
            Ok(event) => match self.dispatcher.handle(&event).await {
                Ok(()) => Disposition::Acked,
                Err(e) if e.is_retryable() => {
                    tracing::info!(message_id = %message_id, "Got exception while handling message; sending NACK");
                    Disposition::Nacked
                }
                Err(_) => Disposition::Acked,
            },
        };

        match disposition {
            Disposition::Nacked => self.bus.nack(message_id).await?,
            _ => self.bus.ack(message_id).await?,
        }
        metrics::record_message(disposition.as_str());
        Ok(disposition)
    }
}
