use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::daemon::DaemonSupervisor;
use crate::fallback::CliFallback;
use crate::rpc::RpcError;

/// Seam between the orchestrators and whatever is answering engine calls.
///
/// Production uses [`Router`]; tests script their own implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, endpoint: &str, params: Value) -> Result<Value, RpcError>;

    /// Variant with the long-poll timeout; transports without a notion of
    /// per-call timeouts fall through to `call`.
    async fn call_long(&self, endpoint: &str, params: Value) -> Result<Value, RpcError> {
        self.call(endpoint, params).await
    }
}

/// Pure per-call transport decision: RPC while the engine is ready, CLI
/// fallback for allow-listed endpoints otherwise. Holds no state of its
/// own beyond reading the supervisor's status.
pub struct Router {
    supervisor: Arc<DaemonSupervisor>,
    fallback: CliFallback,
}

impl Router {
    pub fn new(supervisor: Arc<DaemonSupervisor>, fallback: CliFallback) -> Self {
        Self {
            supervisor,
            fallback,
        }
    }

    async fn dispatch(&self, endpoint: &str, params: Value, long: bool) -> Result<Value, RpcError> {
        if let Some(rpc) = self.supervisor.rpc() {
            let outcome = if long {
                rpc.call_long(endpoint, &params).await
            } else {
                rpc.call(endpoint, &params).await
            };
            return match outcome {
                Ok(value) => Ok(value),
                Err(original) => {
                    if !self.fallback.supports(endpoint) {
                        return Err(original);
                    }
                    tracing::warn!(
                        "RPC call {} failed ({}), trying CLI fallback",
                        endpoint,
                        original
                    );
                    match self.fallback.run(endpoint, &params).await {
                        Ok(value) => Ok(value),
                        Err(e) => {
                            tracing::warn!("CLI fallback for {} failed: {}", endpoint, e);
                            // The RPC failure is the interesting one.
                            Err(original)
                        }
                    }
                }
            };
        }

        if self.fallback.supports(endpoint) {
            return self
                .fallback
                .run(endpoint, &params)
                .await
                .map_err(|e| RpcError::Transport(e.to_string()));
        }
        Err(RpcError::Unavailable)
    }
}

#[async_trait]
impl Transport for Router {
    async fn call(&self, endpoint: &str, params: Value) -> Result<Value, RpcError> {
        self.dispatch(endpoint, params, false).await
    }

    async fn call_long(&self, endpoint: &str, params: Value) -> Result<Value, RpcError> {
        self.dispatch(endpoint, params, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::UpdateBus;
    use crate::config::ServiceConfig;
    use common::prelude::Settings;
    use serde_json::json;

    fn downed_router() -> Router {
        let mut settings = Settings::default();
        settings.engine_binary = "/nonexistent/dockhand-test-engine".into();
        let config = Arc::new(ServiceConfig::from_settings(&settings));
        let supervisor = Arc::new(DaemonSupervisor::new(config.clone(), UpdateBus::new()));
        let fallback = CliFallback::new(&config.engine_binary, &config.config_path);
        Router::new(supervisor, fallback)
    }

    #[tokio::test]
    async fn job_endpoints_require_the_rpc_channel() {
        let router = downed_router();
        let err = router.call("mount/mount", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Unavailable));
    }

    #[tokio::test]
    async fn allow_listed_endpoints_reach_the_fallback_when_down() {
        let router = downed_router();
        // The fallback binary does not exist, but the call must at least
        // be routed to it rather than rejected outright.
        let err = router.call("core/version", json!({})).await.unwrap_err();
        assert!(!matches!(err, RpcError::Unavailable));
    }
}
