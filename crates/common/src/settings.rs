use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "dockhand";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
pub const BOOKMARKS_FILE_NAME: &str = "bookmarks.conf";

/// Scalar configuration the service is assembled from.
///
/// Everything here feeds the supervisor's argv or the RPC client; none of
/// it is live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path or name of the sync/mount engine executable.
    pub engine_binary: PathBuf,
    /// Whether the RPC channel is used at all. When false the service runs
    /// permanently in CLI-fallback mode and mount/sync are unavailable.
    pub rpc_enabled: bool,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub rpc_user: String,
    pub rpc_pass: String,
    /// Allowed origin for the engine's RPC endpoint.
    pub rpc_allow_origin: String,
    /// The engine config file holding bookmark and slot records.
    pub config_path: PathBuf,
    /// Engine-side cache directory.
    pub cache_dir: PathBuf,
    /// Base directory under which generated mount points are created,
    /// namespaced per bookmark and slot.
    pub mount_base_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let base = Self::dockhand_dir().unwrap_or_else(|_| PathBuf::from(".dockhand"));
        Self {
            engine_binary: PathBuf::from("rclone"),
            rpc_enabled: true,
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: 5572,
            rpc_user: APP_NAME.to_string(),
            rpc_pass: "dockhand-rc".to_string(),
            rpc_allow_origin: "http://localhost".to_string(),
            config_path: base.join(BOOKMARKS_FILE_NAME),
            cache_dir: base.join("cache"),
            mount_base_dir: base.join("mounts"),
        }
    }
}

impl Settings {
    /// The dockhand directory path (~/.dockhand).
    pub fn dockhand_dir() -> Result<PathBuf, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn default_path() -> Result<PathBuf, SettingsError> {
        Ok(Self::dockhand_dir()?.join(SETTINGS_FILE_NAME))
    }

    pub fn load(path: &PathBuf) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load from the given path, falling back to defaults when the file
    /// does not exist yet.
    pub fn load_or_default(path: &PathBuf) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Base URL of the engine's RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}/", self.rpc_host, self.rpc_port)
    }

    /// `host:port` pair the engine binds its RPC listener to.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);

        let mut settings = Settings::default();
        settings.rpc_port = 5573;
        settings.rpc_enabled = false;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.rpc_port, 5573);
        assert!(!loaded.rpc_enabled);
        assert_eq!(loaded.rpc_addr(), format!("{}:5573", loaded.rpc_host));
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let settings = Settings::load_or_default(&path).unwrap();
        assert!(settings.rpc_enabled);
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "rpc_port = 6000\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.rpc_port, 6000);
        assert_eq!(settings.rpc_host, "127.0.0.1");
    }
}
