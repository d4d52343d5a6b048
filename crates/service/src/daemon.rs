use std::ffi::OsString;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::bus::UpdateBus;
use crate::config::ServiceConfig;
use crate::rpc::{RpcClient, RpcError};

/// Interval of the monitor task watching for unexpected engine exits.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of the supervised engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Stopped,
    Starting,
    Polling,
    Ready,
}

/// Spawns the engine in remote-control mode and tracks its liveness.
///
/// Readiness means the RPC endpoint answered a `core/version` probe, not
/// that the process printed anything in particular; its output is only
/// forwarded to the log. An unexpected exit flips the state back to
/// `Stopped` and drops the RPC handle, but nothing is restarted without an
/// explicit new `start` call.
pub struct DaemonSupervisor {
    config: Arc<ServiceConfig>,
    status: parking_lot::RwLock<DaemonStatus>,
    child: tokio::sync::Mutex<Option<Child>>,
    rpc: parking_lot::RwLock<Option<Arc<RpcClient>>>,
    stopping: AtomicBool,
    bus: UpdateBus,
}

impl DaemonSupervisor {
    pub fn new(config: Arc<ServiceConfig>, bus: UpdateBus) -> Self {
        Self {
            config,
            status: parking_lot::RwLock::new(DaemonStatus::Stopped),
            child: tokio::sync::Mutex::new(None),
            rpc: parking_lot::RwLock::new(None),
            stopping: AtomicBool::new(false),
            bus,
        }
    }

    pub fn status(&self) -> DaemonStatus {
        *self.status.read()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == DaemonStatus::Ready
    }

    /// RPC client for the running engine, present only while `Ready`.
    pub fn rpc(&self) -> Option<Arc<RpcClient>> {
        self.rpc.read().clone()
    }

    /// Spawn the engine and poll until its RPC endpoint answers or the
    /// startup deadline lapses.
    pub async fn start(self: &Arc<Self>) -> Result<(), DaemonError> {
        if !self.config.rpc_enabled {
            return Err(DaemonError::RpcDisabled);
        }
        {
            let mut status = self.status.write();
            if *status != DaemonStatus::Stopped {
                return Err(DaemonError::AlreadyRunning);
            }
            *status = DaemonStatus::Starting;
        }
        self.stopping.store(false, Ordering::SeqCst);

        tracing::info!(
            "Starting engine {} on {}",
            self.config.engine_binary.display(),
            self.config.rpc_addr
        );

        let mut child = match Command::new(&self.config.engine_binary)
            .args(build_args(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.set_status(DaemonStatus::Stopped);
                return Err(DaemonError::Spawn(e));
            }
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let rpc_client = Arc::new(RpcClient::new(
            &self.config.rpc_url,
            &self.config.rpc_user,
            &self.config.rpc_pass,
            self.config.request_timeout,
            self.config.long_request_timeout,
        )?);

        *self.child.lock().await = Some(child);
        self.set_status(DaemonStatus::Polling);

        match self.poll_until_ready(&rpc_client).await {
            Ok(()) => {}
            Err(e) => {
                self.force_stop().await;
                return Err(e);
            }
        }

        *self.rpc.write() = Some(rpc_client);
        self.set_status(DaemonStatus::Ready);
        tracing::info!("Engine ready on {}", self.config.rpc_addr);

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.monitor().await });

        Ok(())
    }

    async fn poll_until_ready(&self, rpc: &RpcClient) -> Result<(), DaemonError> {
        tokio::time::sleep(self.config.startup_grace).await;
        let deadline = Instant::now() + self.config.startup_deadline;

        loop {
            // A startup crash beats any amount of further polling.
            {
                let mut guard = self.child.lock().await;
                match guard.as_mut() {
                    Some(child) => {
                        if let Some(status) = child.try_wait()? {
                            guard.take();
                            return Err(DaemonError::ExitedDuringStartup(status.to_string()));
                        }
                    }
                    None => return Err(DaemonError::NotRunning),
                }
            }

            match rpc.call("core/version", &json!({})).await {
                Ok(version) => {
                    tracing::debug!("Engine answered readiness probe: {}", version);
                    return Ok(());
                }
                Err(e) => tracing::debug!("Engine not ready yet: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(DaemonError::StartupTimeout);
            }
            tokio::time::sleep(self.config.startup_poll).await;
        }
    }

    /// Watch for the engine dying underneath us while `Ready`.
    async fn monitor(self: Arc<Self>) {
        loop {
            tokio::time::sleep(MONITOR_INTERVAL).await;
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let exited = {
                let mut guard = self.child.lock().await;
                match guard.as_mut() {
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => {
                            guard.take();
                            Some(status.to_string())
                        }
                        Ok(None) => None,
                        Err(e) => {
                            tracing::warn!("Failed to poll engine process: {}", e);
                            None
                        }
                    },
                    // Taken by a shutdown on another task.
                    None => return,
                }
            };

            if let Some(status) = exited {
                tracing::error!("Engine exited unexpectedly ({})", status);
                *self.rpc.write() = None;
                self.set_status(DaemonStatus::Stopped);
                return;
            }
        }
    }

    /// Terminate the engine: ask nicely, wait a bounded amount, then kill.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let child = self.child.lock().await.take();

        if let Some(mut child) = child {
            terminate(&child).await;
            match tokio::time::timeout(self.config.shutdown_wait, child.wait()).await {
                Ok(Ok(status)) => tracing::info!("Engine stopped ({})", status),
                Ok(Err(e)) => tracing::warn!("Failed to reap engine process: {}", e),
                Err(_) => {
                    tracing::warn!("Engine ignored terminate request, killing it");
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill engine process: {}", e);
                    }
                }
            }
        }

        *self.rpc.write() = None;
        self.set_status(DaemonStatus::Stopped);
    }

    async fn force_stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        *self.rpc.write() = None;
        self.set_status(DaemonStatus::Stopped);
    }

    fn set_status(&self, status: DaemonStatus) {
        let changed = {
            let mut guard = self.status.write();
            let changed = *guard != status;
            *guard = status;
            changed
        };
        if changed {
            self.bus.notify();
        }
    }
}

/// Deterministic argv for the engine's remote-control mode. Nothing here
/// passes through a shell.
fn build_args(config: &ServiceConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "rcd".into(),
        "--rc-addr".into(),
        config.rpc_addr.clone().into(),
        "--rc-user".into(),
        config.rpc_user.clone().into(),
        "--rc-pass".into(),
        config.rpc_pass.clone().into(),
        "--rc-allow-origin".into(),
        config.rpc_allow_origin.clone().into(),
    ];
    args.push("--config".into());
    args.push(config.config_path.as_os_str().to_os_string());
    args.push("--cache-dir".into());
    args.push(config.cache_dir.as_os_str().to_os_string());
    args
}

async fn forward_output(stream: impl AsyncRead + Unpin, stream_name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "engine", "[{}] {}", stream_name, line);
    }
}

#[cfg(unix)]
async fn terminate(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let _ = Command::new("kill").arg(pid.to_string()).status().await;
}

#[cfg(not(unix))]
async fn terminate(_child: &Child) {}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to start engine: {0}")]
    Spawn(std::io::Error),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine exited during startup ({0})")]
    ExitedDuringStartup(String),

    #[error("engine did not become ready before the startup deadline")]
    StartupTimeout,

    #[error("engine is not running")]
    NotRunning,

    #[error("the RPC channel is disabled in settings")]
    RpcDisabled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::prelude::Settings;

    fn test_config() -> ServiceConfig {
        let mut settings = Settings::default();
        settings.engine_binary = "/nonexistent/dockhand-test-engine".into();
        ServiceConfig::from_settings(&settings)
    }

    #[test]
    fn argv_is_deterministic_and_complete() {
        let config = test_config();
        let args = build_args(&config);
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(rendered[0], "rcd");
        assert!(rendered.contains(&"--rc-addr".to_string()));
        assert!(rendered.contains(&config.rpc_addr));
        assert!(rendered.contains(&"--rc-user".to_string()));
        assert!(rendered.contains(&"--config".to_string()));
        assert!(rendered.contains(&"--cache-dir".to_string()));
        assert_eq!(args, build_args(&config));
    }

    #[tokio::test]
    async fn spawn_failure_returns_to_stopped() {
        let supervisor = Arc::new(DaemonSupervisor::new(
            Arc::new(test_config()),
            UpdateBus::new(),
        ));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, DaemonError::Spawn(_)));
        assert_eq!(supervisor.status(), DaemonStatus::Stopped);
        assert!(supervisor.rpc().is_none());
    }

    #[tokio::test]
    async fn start_refuses_when_rpc_disabled() {
        let mut config = test_config();
        config.rpc_enabled = false;
        let supervisor = Arc::new(DaemonSupervisor::new(Arc::new(config), UpdateBus::new()));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, DaemonError::RpcDisabled));
        assert_eq!(supervisor.status(), DaemonStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let supervisor = DaemonSupervisor::new(Arc::new(test_config()), UpdateBus::new());
        supervisor.stop().await;
        assert_eq!(supervisor.status(), DaemonStatus::Stopped);
    }
}
