//! Read-only view of the `brane` CLI's active instance.
//!
//! The CLI keeps the name of the active instance in `<config>/active_instance`
//! and per-instance settings in `<config>/instances/<name>/info.yml`. Only
//! the two addresses are read; everything else in those files is ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Name of the file holding the active instance name.
pub const ACTIVE_INSTANCE_FILE: &str = "active_instance";

/// Addresses advertised by an instance definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceAddresses {
    pub api: Option<String>,
    pub drv: Option<String>,
}

#[derive(Deserialize)]
struct InstanceInfo {
    #[serde(default)]
    api: Option<String>,
    #[serde(default)]
    drv: Option<String>,
}

/// Default location of the `brane` CLI configuration.
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("brane"))
}

/// Read the addresses of the active instance below `config_dir`.
///
/// Any missing or unreadable file yields `None`.
#[must_use]
pub fn read_active_instance(config_dir: &Path) -> Option<InstanceAddresses> {
    let name = match std::fs::read_to_string(config_dir.join(ACTIVE_INSTANCE_FILE)) {
        Ok(name) => name.trim().to_string(),
        Err(e) => {
            tracing::debug!(dir = %config_dir.display(), "No active instance: {e}");
            return None;
        }
    };
    if name.is_empty() {
        return None;
    }

    let info_path = config_dir.join("instances").join(&name).join("info.yml");
    let raw = match std::fs::read_to_string(&info_path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(path = %info_path.display(), "Cannot read instance info: {e}");
            return None;
        }
    };
    match serde_yaml::from_str::<InstanceInfo>(&raw) {
        Ok(info) => Some(InstanceAddresses {
            api: info.api,
            drv: info.drv,
        }),
        Err(e) => {
            tracing::debug!(path = %info_path.display(), "Malformed instance info: {e}");
            None
        }
    }
}
