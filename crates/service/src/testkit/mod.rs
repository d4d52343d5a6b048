//! Deterministic test doubles for the orchestration layer.
//!
//! No engine process, no network: a [`ScriptedTransport`] answers endpoint
//! calls from pre-queued responses and records everything it was asked,
//! and a [`RecordingSink`] captures user-visible reports.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use common::prelude::Settings;

use crate::config::ServiceConfig;
use crate::router::Transport;
use crate::rpc::RpcError;
use crate::state::State;
use crate::status::{StatusLevel, StatusSink};

/// Transport double answering from per-endpoint response queues.
///
/// Unscripted endpoints answer [`RpcError::Unavailable`], the same thing
/// the router says about job endpoints while the engine is down.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next response for an endpoint.
    pub fn script(&self, endpoint: &str, response: Result<Value, RpcError>) {
        self.responses
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Endpoint names of every call made so far, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(e, _)| e.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, endpoint: &str, params: Value) -> Result<Value, RpcError> {
        self.calls.lock().push((endpoint.to_string(), params));
        self.responses
            .lock()
            .get_mut(endpoint)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Err(RpcError::Unavailable))
    }
}

/// Sink double capturing reports for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(StatusLevel, String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(StatusLevel, String, String)> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl StatusSink for RecordingSink {
    fn report(&self, level: StatusLevel, title: &str, message: &str) {
        self.events
            .lock()
            .push((level, title.to_string(), message.to_string()));
    }
}

/// Service state over a scripted transport, with every path routed into
/// the given scratch directory. The supervisor is present but never
/// started.
pub fn scripted_state(
    dir: &Path,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn StatusSink>,
) -> Arc<State> {
    let mut settings = Settings::default();
    settings.engine_binary = "/nonexistent/dockhand-test-engine".into();
    settings.rpc_enabled = true;
    settings.config_path = dir.join("bookmarks.conf");
    settings.cache_dir = dir.join("cache");
    settings.mount_base_dir = dir.join("mounts");

    let mut config = ServiceConfig::from_settings(&settings);
    // Keep polling loops quick under test.
    config.job_poll_interval = std::time::Duration::from_millis(5);
    config.bootstrap_timeout = std::time::Duration::from_secs(5);

    State::with_parts(config, transport, sink)
}
