//! STOMP 1.1 client.
//!
//! # Responsibilities
//! - Connect to the first reachable endpoint of an ordered list
//! - Subscribe with client-individual acknowledgement
//! - Deliver MESSAGE frames; send ACK and NACK
//!
//! # Design Decisions
//! - A reader task owns the read half and feeds parsed frames into a
//!   channel, so a receive cancelled by a timeout never loses a partial frame
//! - Every session gets a fresh subscription id
//! - A failed pass over all endpoints waits with backoff, then starts over

use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::frame::{Frame, FrameDecoder};
use crate::broker::{BrokerError, Message, MessageBus};
use crate::config::{BrokerConfig, ConfigError};
use crate::net::{BrokerEndpoint, BrokerStream};
use crate::resilience::backoff::Backoff;

const READ_CHUNK: usize = 8 * 1024;
const FRAME_QUEUE: usize = 64;

/// Default STOMP client id: `<hostname>-<pid>`.
pub fn default_client_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

struct Session {
    endpoint: String,
    subscription: String,
    writer: WriteHalf<BrokerStream>,
    frames: mpsc::Receiver<Result<Frame, BrokerError>>,
    reader: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Session {
    async fn send(&mut self, frame: &Frame) -> Result<(), BrokerError> {
        self.writer.write_all(&frame.encode()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// [`MessageBus`] over STOMP 1.1.
pub struct StompBus {
    endpoints: Vec<BrokerEndpoint>,
    login: String,
    passcode: String,
    destination: String,
    client_id: String,
    connect_timeout: Duration,
    backoff: Backoff,
    session: Option<Session>,
}

impl StompBus {
    /// Build a client from configuration, loading TLS material.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ConfigError> {
        let endpoints = config
            .hosts
            .iter()
            .map(BrokerEndpoint::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            endpoints,
            login: config.user.clone(),
            passcode: config.password.clone(),
            destination: config.destination.clone(),
            client_id: config.client_id.clone().unwrap_or_else(default_client_id),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            backoff: Backoff::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms),
            session: None,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn open_session(&self, endpoint: &BrokerEndpoint) -> Result<Session, BrokerError> {
        tracing::info!(endpoint = %endpoint, tls = endpoint.is_tls(), "Connecting to broker");
        let stream = endpoint.connect(self.connect_timeout).await?;
        let (read_half, writer) = tokio::io::split(stream);
        let (tx, frames) = mpsc::channel(FRAME_QUEUE);
        let reader = tokio::spawn(read_frames(read_half, tx));

        let mut session = Session {
            endpoint: endpoint.to_string(),
            subscription: Uuid::new_v4().to_string(),
            writer,
            frames,
            reader,
        };

        let connect = Frame::new("CONNECT")
            .header("accept-version", "1.1")
            .header("host", endpoint.host.as_str())
            .header("client-id", self.client_id.as_str())
            .header("login", self.login.as_str())
            .header("passcode", self.passcode.as_str())
            .header("heart-beat", "0,0");
        session.send(&connect).await?;

        let reply = tokio::time::timeout(self.connect_timeout, session.frames.recv())
            .await
            .map_err(|_| BrokerError::Protocol("no CONNECTED frame before timeout".into()))?
            .ok_or(BrokerError::ConnectionLost)??;
        match reply.command.as_str() {
            "CONNECTED" => {}
            "ERROR" => return Err(BrokerError::Protocol(error_text(&reply))),
            other => {
                return Err(BrokerError::Protocol(format!(
                    "expected CONNECTED, got {}",
                    other
                )))
            }
        }

        tracing::info!(destination = %self.destination, "Subscribing");
        let subscribe = Frame::new("SUBSCRIBE")
            .header("id", session.subscription.as_str())
            .header("destination", self.destination.as_str())
            .header("ack", "client-individual");
        session.send(&subscribe).await?;
        Ok(session)
    }

    async fn acknowledge(&mut self, command: &str, message_id: &str) -> Result<(), BrokerError> {
        let session = self.session.as_mut().ok_or(BrokerError::NotConnected)?;
        let frame = Frame::new(command)
            .header("message-id", message_id)
            .header("subscription", session.subscription.as_str());
        let result = session.send(&frame).await;
        if result.is_err() {
            self.session = None;
        }
        result
    }
}

#[async_trait]
impl MessageBus for StompBus {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.session = None;
        if self.endpoints.is_empty() {
            return Err(BrokerError::Protocol("no broker endpoints configured".into()));
        }
        loop {
            for endpoint in &self.endpoints {
                match self.open_session(endpoint).await {
                    Ok(session) => {
                        tracing::info!(
                            endpoint = %session.endpoint,
                            subscription = %session.subscription,
                            "Connected to broker"
                        );
                        self.session = Some(session);
                        self.backoff.reset();
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "Broker connection failed");
                    }
                }
            }
            let delay = self.backoff.next_delay();
            tracing::warn!(
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "No broker reachable, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn receive(&mut self) -> Result<Message, BrokerError> {
        loop {
            let session = self.session.as_mut().ok_or(BrokerError::NotConnected)?;
            let frame = match session.frames.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.session = None;
                    return Err(e);
                }
                None => {
                    self.session = None;
                    return Err(BrokerError::ConnectionLost);
                }
            };

            match frame.command.as_str() {
                "MESSAGE" => {
                    let mut message = Message::new(String::from_utf8_lossy(&frame.body));
                    for (name, value) in frame.headers {
                        message.headers.entry(name).or_insert(value);
                    }
                    return Ok(message);
                }
                "ERROR" => {
                    self.session = None;
                    return Err(BrokerError::Protocol(error_text(&frame)));
                }
                other => tracing::debug!(command = %other, "Ignoring broker frame"),
            }
        }
    }

    async fn ack(&mut self, message_id: &str) -> Result<(), BrokerError> {
        self.acknowledge("ACK", message_id).await
    }

    async fn nack(&mut self, message_id: &str) -> Result<(), BrokerError> {
        self.acknowledge("NACK", message_id).await
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.send(&Frame::new("DISCONNECT")).await;
            let _ = session.writer.shutdown().await;
            tracing::info!(endpoint = %session.endpoint, "Disconnected from broker");
        }
    }
}

fn error_text(frame: &Frame) -> String {
    let message = frame.get("message").unwrap_or("ERROR frame");
    let body = String::from_utf8_lossy(&frame.body);
    if body.trim().is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", message, body.trim())
    }
}

/// Parse frames off the read half until it fails or the receiver goes away.
async fn read_frames(
    mut reader: ReadHalf<BrokerStream>,
    tx: mpsc::Sender<Result<Frame, BrokerError>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
        }

        match reader.read(&mut chunk).await {
            Ok(0) => {
                let _ = tx.send(Err(BrokerError::ConnectionLost)).await;
                return;
            }
            Ok(n) => decoder.extend(&chunk[..n]),
            Err(e) => {
                let _ = tx.send(Err(BrokerError::Io(e))).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerHost;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_bus_can_move_between_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BrokerStream>();
        assert_send_sync::<StompBus>();
    }

    /// Read one NUL-terminated frame from a test broker socket.
    async fn read_client_frame<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Frame {
        let mut raw = Vec::new();
        reader.read_until(0, &mut raw).await.unwrap();
        Frame::parse(&raw).unwrap().unwrap().0
    }

    fn config(port: u16) -> BrokerConfig {
        BrokerConfig {
            hosts: vec![BrokerHost {
                host: "127.0.0.1".into(),
                port,
                tls: None,
            }],
            client_id: Some("router-1-42".into()),
            ..BrokerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_subscribe_receive_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);

            let connect = read_client_frame(&mut read).await;
            assert_eq!(connect.command, "CONNECT");
            assert_eq!(connect.get("accept-version"), Some("1.1"));
            assert_eq!(connect.get("client-id"), Some("router-1-42"));
            assert_eq!(connect.get("login"), Some("routinginfo"));
            write.write_all(b"CONNECTED\nversion:1.1\n\n\0").await.unwrap();

            let subscribe = read_client_frame(&mut read).await;
            assert_eq!(subscribe.command, "SUBSCRIBE");
            assert_eq!(subscribe.get("ack"), Some("client-individual"));
            assert_eq!(subscribe.get("destination"), Some("/topic/routinginfo"));
            let sub = subscribe.get("id").unwrap().to_string();

            // Split the message across two writes.
            write.write_all(b"\nMESSAGE\nmessage-id:m-1\nsub").await.unwrap();
            write.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            write
                .write_all(b"scription:x\n\n:action: :reinit_start\0")
                .await
                .unwrap();

            let ack = read_client_frame(&mut read).await;
            assert_eq!(ack.command, "ACK");
            assert_eq!(ack.get("message-id"), Some("m-1"));
            assert_eq!(ack.get("subscription"), Some(sub.as_str()));
        });

        let mut bus = StompBus::from_config(&config(port)).unwrap();
        bus.connect().await.unwrap();
        assert!(bus.is_connected());

        let message = bus.receive().await.unwrap();
        assert_eq!(message.message_id(), Some("m-1"));
        assert_eq!(message.body, ":action: :reinit_start");
        bus.ack("m-1").await.unwrap();

        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_receive_keeps_partial_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let broker = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);
            read_client_frame(&mut read).await;
            write.write_all(b"CONNECTED\n\n\0").await.unwrap();
            read_client_frame(&mut read).await;

            write.write_all(b"MESSAGE\nmessage-id:m-2\n\nhal").await.unwrap();
            release_rx.await.unwrap();
            write.write_all(b"f\0").await.unwrap();
            // Keep the socket open until the client is done.
            let mut rest = Vec::new();
            let _ = read.read_to_end(&mut rest).await;
        });

        let mut bus = StompBus::from_config(&config(port)).unwrap();
        bus.connect().await.unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(50), bus.receive()).await;
        assert!(timed_out.is_err());
        release_tx.send(()).unwrap();

        let message = bus.receive().await.unwrap();
        assert_eq!(message.body, "half");
        bus.disconnect().await;
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_frame_drops_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);
            read_client_frame(&mut read).await;
            write.write_all(b"CONNECTED\n\n\0").await.unwrap();
            read_client_frame(&mut read).await;
            write
                .write_all(b"ERROR\nmessage:subscription revoked\n\n\0")
                .await
                .unwrap();
        });

        let mut bus = StompBus::from_config(&config(port)).unwrap();
        bus.connect().await.unwrap();
        let err = bus.receive().await.unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(ref m) if m.contains("revoked")));
        assert!(!bus.is_connected());
        assert!(matches!(bus.ack("m").await, Err(BrokerError::NotConnected)));
        broker.await.unwrap();
    }

    #[test]
    fn test_default_client_id_has_pid() {
        let id = default_client_id();
        assert!(id.ends_with(&format!("-{}", std::process::id())));
    }
}
