//! Message bus subsystem.
//!
//! # Data Flow
//! ```text
//! Broker endpoints (ordered)
//!     → net (TCP / TLS)
//!     → stomp.rs (CONNECT, SUBSCRIBE, reader task)
//!     → frame.rs (STOMP 1.1 codec)
//!     → Message { headers, body } to the consumer
//!
//! Consumer verdict → ACK / NACK (message-id + subscription)
//! ```
//!
//! # Design Decisions
//! - The consumer depends on the MessageBus trait, not on STOMP
//! - Any transport failure drops the session; the consumer reconnects

pub mod frame;
pub mod stomp;

use std::collections::BTreeMap;
use async_trait::async_trait;
use thiserror::Error;

pub use stomp::StompBus;

/// Transport failures. All of them call for a reconnect.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection to broker lost")]
    ConnectionLost,

    #[error("Not connected to a broker")]
    NotConnected,

    #[error("Broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error("Broker TLS error: {0}")]
    Tls(String),
}

impl From<frame::FrameError> for BrokerError {
    fn from(e: frame::FrameError) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Broker-assigned id used for acknowledgement.
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id").map(String::as_str)
    }
}

/// A subscription with per-message acknowledgement.
#[async_trait]
pub trait MessageBus: Send {
    /// Establish a session and subscribe. Retries until it succeeds.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Wait for the next message. Cancel-safe.
    async fn receive(&mut self) -> Result<Message, BrokerError>;

    /// Acknowledge a message; the broker will not redeliver it.
    async fn ack(&mut self, message_id: &str) -> Result<(), BrokerError>;

    /// Reject a message; the broker may redeliver it.
    async fn nack(&mut self, message_id: &str) -> Result<(), BrokerError>;

    /// Close the session, if any.
    async fn disconnect(&mut self);
}
