/// Severity of a user-visible report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Fire-and-forget sink for user-visible outcomes of mount/unmount and
/// sync start/stop operations.
///
/// The tray frontend plugs its notification surface in here; nothing in
/// the service depends on a return value.
pub trait StatusSink: Send + Sync {
    fn report(&self, level: StatusLevel, title: &str, message: &str);
}

/// Default sink that routes reports through the log.
pub struct LogSink;

impl StatusSink for LogSink {
    fn report(&self, level: StatusLevel, title: &str, message: &str) {
        match level {
            StatusLevel::Info => tracing::info!(target: "status", "{}: {}", title, message),
            StatusLevel::Warning => tracing::warn!(target: "status", "{}: {}", title, message),
            StatusLevel::Error => tracing::error!(target: "status", "{}: {}", title, message),
        }
    }
}
