//! Kernel configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::instance::{self, InstanceAddresses};

/// Driver address used when nothing else is configured.
pub const DEFAULT_DRV_ADDR: &str = "127.0.0.1:50053";
/// API address used when nothing else is configured.
pub const DEFAULT_API_ADDR: &str = "http://127.0.0.1:50051";
/// Container-local data directory of the notebook image.
pub const DEFAULT_DATA_DIR: &str = "/home/jovyan/data";
/// Default bound on a single compiler poll.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for environment variable '{var}'")]
    Invalid { var: &'static str, value: String },
}

/// Everything the kernel needs to know about its surroundings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Address of the remote driver service.
    pub driver_addr: String,
    /// Address of the remote API service.
    pub api_addr: String,
    /// Local directory that `file:///data` maps onto.
    pub data_dir: PathBuf,
    /// Certificates for the remote instance, if any.
    pub certs_dir: Option<PathBuf>,
    /// Compiler command line; `None` sends snippets uncompiled.
    pub compiler: Option<String>,
    /// Bound on a single compiler poll.
    pub compile_timeout: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            driver_addr: DEFAULT_DRV_ADDR.to_string(),
            api_addr: DEFAULT_API_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            certs_dir: None,
            compiler: None,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }
}

impl KernelConfig {
    /// Build the configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if a variable holds an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let instance_dir = instance::default_config_dir();
        Self::from_lookup(|var| std::env::var(var).ok(), instance_dir.as_deref())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Addresses missing from the lookup are taken from the active `brane`
    /// instance below `instance_dir`, then from the built-in defaults.
    ///
    /// # Errors
    /// Returns error if a variable holds an unparsable value.
    pub fn from_lookup<F>(lookup: F, instance_dir: Option<&Path>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut driver_addr = var("BRANE_DRV_ADDR").or_else(|| var("BRANE_DRV_URL"));
        let mut api_addr = var("BRANE_API_ADDR");
        if driver_addr.is_none() || api_addr.is_none() {
            let InstanceAddresses { api, drv } = instance_dir
                .and_then(instance::read_active_instance)
                .unwrap_or_default();
            driver_addr = driver_addr.or(drv);
            api_addr = api_addr.or(api);
        }

        let compile_timeout = match var("BRANE_COMPILE_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid {
                    var: "BRANE_COMPILE_TIMEOUT",
                    value: raw,
                })?,
            None => DEFAULT_COMPILE_TIMEOUT,
        };

        Ok(Self {
            driver_addr: driver_addr.unwrap_or_else(|| DEFAULT_DRV_ADDR.to_string()),
            api_addr: api_addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            data_dir: var("BRANE_DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from),
            certs_dir: var("BRANE_CERTS_DIR").map(PathBuf::from),
            compiler: var("BRANE_COMPILER"),
            compile_timeout,
        })
    }
}
