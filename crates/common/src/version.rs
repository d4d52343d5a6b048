use std::fmt;

use serde::{Deserialize, Serialize};

/// Build identity of this dockhand install, as opposed to the engine
/// version reported over RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub build_profile: String,
    pub build_timestamp: String,
}

impl BuildInfo {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_profile: option_env!("BUILD_PROFILE").unwrap_or("unknown").to_string(),
            build_timestamp: option_env!("BUILD_TIMESTAMP")
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    pub fn is_debug(&self) -> bool {
        self.build_profile == "debug"
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dockhand {} ({})", self.version, self.build_profile)
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_info_carries_package_version() {
        let info = build_info();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.to_string().contains(&info.version));
    }
}
