//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tempfile::TempDir;

use routing_daemon::broker::{BrokerError, Message, MessageBus};
use routing_daemon::config::{DaemonConfig, ServiceControlKind};
use routing_daemon::consumer::Consumer;
use routing_daemon::lifecycle::startup;
use routing_daemon::load_balancer::apache::ApacheBackend;
use routing_daemon::load_balancer::service::RecordingService;

/// Something the in-memory bus hands to `receive`.
#[derive(Debug, Clone)]
pub enum Delivery {
    Message(Message),
    /// Simulate a lost connection.
    Disconnect,
}

#[derive(Debug, Default)]
struct BusState {
    queue: VecDeque<Delivery>,
    connected: bool,
    connects: usize,
    acks: Vec<String>,
    nacks: Vec<String>,
}

/// In-memory message bus. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, delivery: Delivery) {
        self.state.lock().unwrap().queue.push_back(delivery);
    }

    pub fn push_message(&self, id: &str, body: &str) {
        self.push(Delivery::Message(message(id, body)));
    }

    pub fn acks(&self) -> Vec<String> {
        self.state.lock().unwrap().acks.clone()
    }

    pub fn nacks(&self) -> Vec<String> {
        self.state.lock().unwrap().nacks.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message, BrokerError> {
        let next = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(BrokerError::NotConnected);
            }
            state.queue.pop_front()
        };
        match next {
            Some(Delivery::Message(message)) => Ok(message),
            Some(Delivery::Disconnect) => {
                self.state.lock().unwrap().connected = false;
                Err(BrokerError::ConnectionLost)
            }
            None => std::future::pending().await,
        }
    }

    async fn ack(&mut self, message_id: &str) -> Result<(), BrokerError> {
        self.state.lock().unwrap().acks.push(message_id.to_string());
        Ok(())
    }

    async fn nack(&mut self, message_id: &str) -> Result<(), BrokerError> {
        self.state.lock().unwrap().nacks.push(message_id.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.state.lock().unwrap().connected = false;
    }
}

/// A message with a `message-id` header.
pub fn message(id: &str, body: &str) -> Message {
    Message::new(body).with_header("message-id", id)
}

/// Body of an `add_public_endpoint` event in the platform's YAML dialect.
pub fn add_endpoint_body(app: &str, namespace: &str, address: &str, port: u16, gear_size: &str) -> String {
    format!(
        "---\n:action: :add_public_endpoint\n:app_name: {app}\n:namespace: {namespace}\n:public_address: {address}\n:public_port: {port}\n:protocols:\n- http\n:types:\n- load_balancer\n:mappings:\n- frontend: ''\n  backend: ''\n:gear_size: {gear_size}\n"
    )
}

pub fn remove_endpoint_body(app: &str, namespace: &str, address: &str, port: u16) -> String {
    format!(
        "---\n:action: :remove_public_endpoint\n:app_name: {app}\n:namespace: {namespace}\n:public_address: {address}\n:public_port: {port}\n"
    )
}

pub fn alias_body(action: &str, app: &str, namespace: &str, alias: &str, address: &str, port: u16) -> String {
    format!(
        "---\n:action: :{action}\n:app_name: {app}\n:namespace: {namespace}\n:alias: {alias}\n:public_address: {address}\n:public_port: {port}\n"
    )
}

pub fn simple_body(action: &str, app: &str, namespace: &str) -> String {
    format!("---\n:action: :{action}\n:app_name: {app}\n:namespace: {namespace}\n")
}

/// Temporary host layout plus a recording service controller.
pub struct Harness {
    pub base: TempDir,
    pub config: DaemonConfig,
    pub service: RecordingService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut DaemonConfig)) -> Self {
        let base = TempDir::new().unwrap();
        let tmp = base.path().join("tmp");
        std::fs::create_dir(&tmp).unwrap();

        let mut config = DaemonConfig::default();
        config.apache.conf_dir = base.path().join("conf.d");
        config.apache.tmp_dir = tmp;
        config.apache.service_control = ServiceControlKind::None;
        adjust(&mut config);

        Self {
            base,
            config,
            service: RecordingService::new(),
        }
    }

    pub fn managed_dir(&self) -> PathBuf {
        self.config.apache.conf_dir.join(&self.config.apache.managed_subdir)
    }

    pub async fn backend(&self) -> ApacheBackend {
        startup::build_backend(&self.config, Arc::new(self.service.clone()))
            .await
            .unwrap()
    }

    pub async fn consumer(&self, bus: MemoryBus) -> Consumer<MemoryBus, ApacheBackend> {
        let backend = self.backend().await;
        startup::assemble(&self.config, bus, backend).await.unwrap()
    }
}
