use std::path::PathBuf;

use serde_json::{json, Value};
use tokio::process::Command;

/// Read-only endpoints with a command-line equivalent. Job-style
/// operations (mount, sync) have none by design: without the RPC channel
/// they fail instead of degrading.
const FALLBACK_ENDPOINTS: &[(&str, &[&str])] = &[
    ("core/version", &["version"]),
    ("config/providers", &["config", "providers"]),
    ("config/dump", &["config", "dump"]),
];

/// Synchronous one-shot invocation of the engine binary for the few
/// read-only calls that must keep working while the RPC channel is down.
pub struct CliFallback {
    binary: PathBuf,
    config_path: PathBuf,
}

impl CliFallback {
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
        }
    }

    pub fn supports(&self, endpoint: &str) -> bool {
        FALLBACK_ENDPOINTS.iter().any(|(e, _)| *e == endpoint)
    }

    pub async fn run(&self, endpoint: &str, _params: &Value) -> Result<Value, FallbackError> {
        let args = FALLBACK_ENDPOINTS
            .iter()
            .find(|(e, _)| *e == endpoint)
            .map(|(_, args)| *args)
            .ok_or_else(|| FallbackError::Unsupported(endpoint.to_string()))?;

        tracing::debug!("CLI fallback for {}: {:?}", endpoint, args);
        let output = Command::new(&self.binary)
            .args(args)
            .arg("--config")
            .arg(&self.config_path)
            .output()
            .await
            .map_err(FallbackError::Spawn)?;

        if !output.status.success() {
            return Err(FallbackError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        normalize(endpoint, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Shape CLI output like the corresponding RPC response so callers never
/// notice which transport answered.
fn normalize(endpoint: &str, stdout: &str) -> Result<Value, FallbackError> {
    match endpoint {
        "core/version" => parse_version(stdout)
            .ok_or_else(|| FallbackError::Parse("unrecognized version output".to_string())),
        _ => {
            let value: Value = serde_json::from_str(stdout)
                .map_err(|e| FallbackError::Parse(e.to_string()))?;
            // The provider listing comes back as a bare array on the
            // command line but as an object over RPC.
            if endpoint == "config/providers" && value.is_array() {
                return Ok(json!({ "providers": value }));
            }
            Ok(value)
        }
    }
}

/// First line of `version` output is `<binary> v<semver>`.
fn parse_version(stdout: &str) -> Option<Value> {
    let first = stdout.lines().next()?.trim();
    let version = first.split_whitespace().nth(1)?;
    if !version.starts_with('v') {
        return None;
    }
    Some(json!({ "version": version }))
}

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("no CLI fallback for endpoint {0}")]
    Unsupported(String),

    #[error("failed to run engine binary: {0}")]
    Spawn(std::io::Error),

    #[error("engine exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("unparseable engine output: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_read_only() {
        let fallback = CliFallback::new("/bin/true", "/tmp/bookmarks.conf");
        assert!(fallback.supports("core/version"));
        assert!(fallback.supports("config/dump"));
        assert!(!fallback.supports("mount/mount"));
        assert!(!fallback.supports("sync/bisync"));
        assert!(!fallback.supports("job/status"));
    }

    #[tokio::test]
    async fn unsupported_endpoint_fails_without_spawning() {
        let fallback = CliFallback::new("/nonexistent/engine", "/tmp/bookmarks.conf");
        let err = fallback.run("mount/mount", &json!({})).await.unwrap_err();
        assert!(matches!(err, FallbackError::Unsupported(_)));
    }

    #[test]
    fn version_output_parses_first_line() {
        let value = parse_version("rclone v1.66.0\n- os/version: debian\n").unwrap();
        assert_eq!(value, json!({ "version": "v1.66.0" }));
        assert!(parse_version("garbage").is_none());
    }

    #[test]
    fn provider_array_is_wrapped() {
        let value = normalize("config/providers", r#"[{"Name": "sftp"}]"#).unwrap();
        assert_eq!(value["providers"][0]["Name"], "sftp");
    }
}
