//! Load balancer service control.
//!
//! # Responsibilities
//! - Query whether the load balancer process is running
//! - Reload, restart, stop and disable it
//! - Restore security labels on generated files
//!
//! # Design Decisions
//! - Commands are black boxes; only the exit status is interpreted
//! - A failed status query counts as "not running"
//! - A missing `restorecon` is not an error (non-SELinux hosts)

use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::process::Command;
use crate::load_balancer::{BackendError, BackendResult};

/// Control surface of the load balancer process.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// True when the status query exits with 0.
    async fn is_running(&self) -> bool;

    async fn reload(&self) -> BackendResult<()>;

    async fn restart(&self) -> BackendResult<()>;

    async fn stop(&self) -> BackendResult<()>;

    /// Keep the service from starting at boot.
    async fn disable(&self) -> BackendResult<()>;

    /// Restore security labels below `path`.
    async fn restore_labels(&self, path: &Path) -> BackendResult<()>;
}

/// Controls a service through `service`, `chkconfig` and `restorecon`.
#[derive(Debug, Clone)]
pub struct SysVService {
    name: String,
    restore_labels: bool,
}

impl SysVService {
    pub fn new(name: impl Into<String>, restore_labels: bool) -> Self {
        Self {
            name: name.into(),
            restore_labels,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<ExitStatus> {
        tracing::debug!(program, ?args, "Running service command");
        Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
    }

    async fn service(&self, action: &str) -> BackendResult<()> {
        let status = self
            .run("service", &[self.name.as_str(), action])
            .await
            .map_err(|e| BackendError::Service(format!("service {} {}: {}", self.name, action, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::Service(format!(
                "service {} {} exited with {}",
                self.name, action, status
            )))
        }
    }
}

#[async_trait]
impl ServiceControl for SysVService {
    async fn is_running(&self) -> bool {
        match self.run("service", &[self.name.as_str(), "status"]).await {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::warn!(service = %self.name, error = %e, "Service status query failed");
                false
            }
        }
    }

    async fn reload(&self) -> BackendResult<()> {
        self.service("reload").await
    }

    async fn restart(&self) -> BackendResult<()> {
        self.service("restart").await
    }

    async fn stop(&self) -> BackendResult<()> {
        self.service("stop").await
    }

    async fn disable(&self) -> BackendResult<()> {
        let status = self
            .run("chkconfig", &[self.name.as_str(), "off"])
            .await
            .map_err(|e| BackendError::Service(format!("chkconfig {} off: {}", self.name, e)))?;
        if !status.success() {
            return Err(BackendError::Service(format!(
                "chkconfig {} off exited with {}",
                self.name, status
            )));
        }
        Ok(())
    }

    async fn restore_labels(&self, path: &Path) -> BackendResult<()> {
        if !self.restore_labels {
            return Ok(());
        }
        let path_arg = path.to_string_lossy();
        match self.run("restorecon", &["-R", path_arg.as_ref()]).await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                tracing::warn!(path = %path.display(), %status, "restorecon failed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("restorecon not installed, skipping label restore");
                Ok(())
            }
            Err(e) => Err(BackendError::Service(format!("restorecon: {}", e))),
        }
    }
}

/// A service control call, as recorded by [`RecordingService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Status,
    Reload,
    Restart,
    Stop,
    Disable,
    RestoreLabels(String),
}

/// Records calls instead of running commands.
///
/// Backs `service_control = "none"` and the test suites.
#[derive(Debug, Clone, Default)]
pub struct RecordingService {
    running: Arc<Mutex<bool>>,
    calls: Arc<Mutex<Vec<ServiceCall>>>,
}

impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what the next status queries report.
    pub fn set_running(&self, running: bool) {
        if let Ok(mut guard) = self.running.lock() {
            *guard = running;
        }
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of reloads and restarts so far.
    pub fn reload_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::Reload | ServiceCall::Restart))
            .count()
    }

    fn record(&self, call: ServiceCall) {
        tracing::info!(?call, "Service control (recorded only)");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl ServiceControl for RecordingService {
    async fn is_running(&self) -> bool {
        self.record(ServiceCall::Status);
        self.running.lock().map(|r| *r).unwrap_or(false)
    }

    async fn reload(&self) -> BackendResult<()> {
        self.record(ServiceCall::Reload);
        Ok(())
    }

    async fn restart(&self) -> BackendResult<()> {
        self.record(ServiceCall::Restart);
        self.set_running(true);
        Ok(())
    }

    async fn stop(&self) -> BackendResult<()> {
        self.record(ServiceCall::Stop);
        self.set_running(false);
        Ok(())
    }

    async fn disable(&self) -> BackendResult<()> {
        self.record(ServiceCall::Disable);
        Ok(())
    }

    async fn restore_labels(&self, path: &Path) -> BackendResult<()> {
        self.record(ServiceCall::RestoreLabels(path.display().to_string()));
        Ok(())
    }
}
