mod bus;
mod daemon;
mod fallback;
mod mount;
mod process;
mod router;
mod rpc;
mod status;
mod sync;

mod config;
mod state;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use bus::UpdateBus;
pub use config::ServiceConfig;
pub use daemon::{DaemonError, DaemonStatus, DaemonSupervisor};
pub use fallback::{CliFallback, FallbackError};
pub use mount::{MountError, MountInfo, MountManager};
pub use process::{Service, ServiceError};
pub use router::{Router, Transport};
pub use rpc::{RpcClient, RpcError};
pub use state::State;
pub use status::{LogSink, StatusLevel, StatusSink};
pub use sync::{SyncError, SyncManager, TrackedJob};
