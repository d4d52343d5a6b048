use std::path::PathBuf;
use std::time::Duration;

use common::prelude::Settings;

/// Everything the service needs to supervise one engine instance.
///
/// Built from [`Settings`] once at startup; the timing knobs have fixed
/// defaults and are only overridden by tests.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path or name of the engine executable.
    pub engine_binary: PathBuf,
    /// When false, the RPC channel is never brought up and the service
    /// runs in CLI-fallback-only mode.
    pub rpc_enabled: bool,
    /// `host:port` the engine binds its RPC listener to.
    pub rpc_addr: String,
    /// Base URL of the RPC endpoint, with a trailing slash.
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub rpc_allow_origin: String,
    /// The engine config file doubling as the bookmark store.
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Base directory for generated mount points.
    pub mount_base_dir: PathBuf,

    /// Hard bound on one RPC round trip.
    pub request_timeout: Duration,
    /// Bound for long-poll style calls (job submission under load).
    pub long_request_timeout: Duration,
    /// Grace period before the first readiness probe after spawning.
    pub startup_grace: Duration,
    /// Interval between readiness probes.
    pub startup_poll: Duration,
    /// Total time the engine gets to become ready.
    pub startup_deadline: Duration,
    /// Bounded wait between terminate and force-kill on shutdown.
    pub shutdown_wait: Duration,
    /// Interval of the sync job health-check sweep.
    pub health_interval: Duration,
    /// Interval between job-completion polls.
    pub job_poll_interval: Duration,
    /// Upper bound on waiting for a bootstrap sync run.
    pub bootstrap_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            engine_binary: settings.engine_binary.clone(),
            rpc_enabled: settings.rpc_enabled,
            rpc_addr: settings.rpc_addr(),
            rpc_url: settings.rpc_url(),
            rpc_user: settings.rpc_user.clone(),
            rpc_pass: settings.rpc_pass.clone(),
            rpc_allow_origin: settings.rpc_allow_origin.clone(),
            config_path: settings.config_path.clone(),
            cache_dir: settings.cache_dir.clone(),
            mount_base_dir: settings.mount_base_dir.clone(),

            request_timeout: Duration::from_secs(30),
            long_request_timeout: Duration::from_secs(90),
            startup_grace: Duration::from_secs(2),
            startup_poll: Duration::from_secs(1),
            startup_deadline: Duration::from_secs(15),
            shutdown_wait: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            job_poll_interval: Duration::from_secs(1),
            bootstrap_timeout: Duration::from_secs(60 * 60),
        }
    }
}
