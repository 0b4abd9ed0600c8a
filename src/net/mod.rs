//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Broker endpoint (host, port, optional TLS)
//!     → TCP connect with timeout
//!     → tls.rs (optional TLS handshake)
//!     → BrokerStream handed to the STOMP client
//! ```
//!
//! # Design Decisions
//! - TLS connectors are built once at startup; bad material fails early
//! - Plain and TLS streams share one boxed stream type

pub mod tls;

use std::io;
use std::time::Duration;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::{BrokerHost, ConfigError};

/// Byte stream to a broker.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> AsyncStream for T {}

/// Boxed plain or TLS stream.
pub type BrokerStream = Box<dyn AsyncStream>;

/// A resolved broker endpoint.
#[derive(Clone)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl BrokerEndpoint {
    /// Resolve a configured host, loading its TLS material.
    pub fn from_config(host: &BrokerHost) -> Result<Self, ConfigError> {
        let tls = host.tls.as_ref().map(tls::build_connector).transpose()?;
        Ok(Self {
            host: host.host.clone(),
            port: host.port,
            tls,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Open a stream, giving up after `timeout`.
    pub async fn connect(&self, timeout: Duration) -> io::Result<BrokerStream> {
        tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {} timed out", self)))?
    }

    async fn open(&self) -> io::Result<BrokerStream> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;
        let Some(connector) = &self.tls else {
            return Ok(Box::new(tcp));
        };
        let name = ServerName::try_from(self.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = connector.connect(name, tcp).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = BrokerEndpoint::from_config(&BrokerHost {
            host: "127.0.0.1".into(),
            port,
            tls: None,
        })
        .unwrap();
        assert!(!endpoint.is_tls());
        assert!(endpoint.connect(Duration::from_secs(5)).await.is_ok());
        assert_eq!(endpoint.to_string(), format!("127.0.0.1:{}", port));
    }
}
