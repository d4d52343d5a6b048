use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use common::prelude::StoreError;

use crate::config::ServiceConfig;
use crate::mount::MountManager;
use crate::rpc::RpcError;
use crate::state::State;
use crate::status::StatusLevel;
use crate::sync::SyncManager;

/// Upper bound on the shutdown cleanup sweep so a stuck engine cannot
/// hold the host process open.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// The assembled orchestration service: engine supervisor, mount and sync
/// managers, and the periodic health-check loop.
pub struct Service {
    state: Arc<State>,
    mounts: Arc<MountManager>,
    syncs: Arc<SyncManager>,
    health: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// Assemble a service over existing state without touching the engine.
    pub fn with_state(state: Arc<State>) -> Self {
        let mounts = Arc::new(MountManager::new(state.clone()));
        let syncs = Arc::new(SyncManager::new(state.clone()));
        Self {
            state,
            mounts,
            syncs,
            health: parking_lot::Mutex::new(None),
        }
    }

    /// Bring the whole service up.
    ///
    /// Starts the engine (retrying the spawn once), restores every mount
    /// slot whose stored intent is enabled, and arms the health-check
    /// loop. When the engine cannot be brought up the service degrades to
    /// CLI-fallback mode instead of failing: read endpoints keep working,
    /// mount/sync calls report a missing RPC channel.
    pub async fn start(config: ServiceConfig) -> Service {
        let state = State::from_config(config);
        let service = Self::with_state(state);
        service.bring_up().await;
        service
    }

    async fn bring_up(&self) {
        if !self.state.config().rpc_enabled {
            tracing::info!("RPC channel disabled in settings; running in CLI mode");
        } else {
            let supervisor = self.state.supervisor();
            let mut started = supervisor.start().await;
            if let Err(e) = &started {
                tracing::warn!("Engine failed to start ({}), retrying once", e);
                started = supervisor.start().await;
            }
            match started {
                Ok(()) => self.mounts.restore_enabled().await,
                Err(e) => {
                    self.state.report(
                        StatusLevel::Warning,
                        "Engine unavailable",
                        &format!("running in CLI mode: {}", e),
                    );
                }
            }
        }

        let syncs = self.syncs.clone();
        let interval = self.state.config().health_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first tick; nothing is tracked yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                syncs.health_check().await;
            }
        });
        *self.health.lock() = Some(handle);
    }

    /// Orderly shutdown: stop the health loop, stop every tracked sync
    /// job (bounded), then terminate the engine.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.health.lock().take() {
            handle.abort();
        }
        if tokio::time::timeout(CLEANUP_TIMEOUT, self.syncs.cleanup())
            .await
            .is_err()
        {
            tracing::warn!("Sync cleanup did not settle before the shutdown deadline");
        }
        self.state.supervisor().stop().await;
        self.state.notify();
    }

    /// Delete a bookmark and its slot records. Rejected while anything of
    /// the bookmark is mounted or syncing.
    pub async fn delete_bookmark(&self, name: &str) -> Result<(), ServiceError> {
        if self.mounts.has_active_for_bookmark(name).await
            || self.syncs.has_active_for_bookmark(name).await
        {
            return Err(ServiceError::BookmarkBusy(name.to_string()));
        }
        self.state.store().delete_bookmark(name)?;
        self.state.notify();
        Ok(())
    }

    // Read passthroughs for the frontend; the router picks RPC or the CLI
    // fallback per call.

    pub async fn engine_version(&self) -> Result<Value, RpcError> {
        self.state.transport().call("core/version", json!({})).await
    }

    pub async fn providers(&self) -> Result<Value, RpcError> {
        self.state
            .transport()
            .call("config/providers", json!({}))
            .await
    }

    pub async fn config_dump(&self) -> Result<Value, RpcError> {
        self.state.transport().call("config/dump", json!({})).await
    }

    pub async fn list_remotes(&self) -> Result<Value, RpcError> {
        self.state
            .transport()
            .call("config/listremotes", json!({}))
            .await
    }

    /// Generic runner: submit an arbitrary engine subcommand as an
    /// asynchronous job and return its id.
    pub async fn run_command(&self, command: &str, args: &[&str]) -> Result<i64, RpcError> {
        let value = self
            .state
            .transport()
            .call_long(
                "core/command",
                json!({ "command": command, "arg": args, "_async": true }),
            )
            .await?;
        value
            .get("jobid")
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::Protocol("core/command response carried no jobid".to_string()))
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub fn mounts(&self) -> &Arc<MountManager> {
        &self.mounts
    }

    pub fn syncs(&self) -> &Arc<SyncManager> {
        &self.syncs
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("bookmark {0} has active mounts or sync jobs")]
    BookmarkBusy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
