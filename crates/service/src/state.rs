use std::sync::Arc;

use common::prelude::ConfigStore;

use crate::bus::UpdateBus;
use crate::config::ServiceConfig;
use crate::daemon::DaemonSupervisor;
use crate::fallback::CliFallback;
use crate::router::{Router, Transport};
use crate::status::{LogSink, StatusLevel, StatusSink};

/// Process-wide wiring shared by the orchestrators.
///
/// The live caches themselves are owned by the mount and sync managers;
/// this only carries the pieces they all need — configuration, the
/// bookmark store, the supervisor, the transport, and the two outward
/// notification surfaces.
pub struct State {
    config: Arc<ServiceConfig>,
    store: ConfigStore,
    supervisor: Arc<DaemonSupervisor>,
    transport: Arc<dyn Transport>,
    bus: UpdateBus,
    sink: Arc<dyn StatusSink>,
}

impl State {
    pub fn from_config(config: ServiceConfig) -> Arc<Self> {
        let config = Arc::new(config);
        let bus = UpdateBus::new();
        let supervisor = Arc::new(DaemonSupervisor::new(config.clone(), bus.clone()));
        let fallback = CliFallback::new(&config.engine_binary, &config.config_path);
        let transport: Arc<dyn Transport> = Arc::new(Router::new(supervisor.clone(), fallback));
        let store = ConfigStore::new(&config.config_path);

        Arc::new(Self {
            config,
            store,
            supervisor,
            transport,
            bus,
            sink: Arc::new(LogSink),
        })
    }

    /// Assemble state around an injected transport and sink. The
    /// supervisor exists but is never started, so no engine process is
    /// touched.
    #[cfg(any(test, feature = "testkit"))]
    pub(crate) fn with_parts(
        config: ServiceConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn StatusSink>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let bus = UpdateBus::new();
        let supervisor = Arc::new(DaemonSupervisor::new(config.clone(), bus.clone()));
        let store = ConfigStore::new(&config.config_path);
        Arc::new(Self {
            config,
            store,
            supervisor,
            transport,
            bus,
            sink,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn supervisor(&self) -> &Arc<DaemonSupervisor> {
        &self.supervisor
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn bus(&self) -> &UpdateBus {
        &self.bus
    }

    /// Fire the update bus after an externally-visible state change.
    pub fn notify(&self) {
        self.bus.notify();
    }

    /// Fire-and-forget user-visible report.
    pub fn report(&self, level: StatusLevel, title: &str, message: &str) {
        self.sink.report(level, title, message);
    }
}
