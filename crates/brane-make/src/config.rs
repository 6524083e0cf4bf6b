//! Command line and typed configuration for the build runner.

use std::{fmt, path::PathBuf, str::FromStr};

use bscript_core::config::{DEFAULT_API_ADDR, DEFAULT_DRV_ADDR};
use clap::Parser;

use crate::error::MakeError;

/// Target processor architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Architecture of the machine running this binary, if supported.
    #[must_use]
    pub fn host() -> Option<Self> {
        std::env::consts::ARCH.parse().ok()
    }

    /// Spelling used by Brane artifacts (`x86_64`, `aarch64`).
    #[must_use]
    pub const fn brane(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Spelling used by container platforms (`amd64`, `arm64`).
    #[must_use]
    pub const fn docker(self) -> &'static str {
        match self {
            Self::X86_64 => "amd64",
            Self::Aarch64 => "arm64",
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            other => Err(format!(
                "unknown architecture '{other}' (expected x86_64/amd64 or aarch64/arm64)"
            )),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.brane())
    }
}

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    MacOs,
    Linux,
}

impl Os {
    /// Operating system running this binary, if supported.
    #[must_use]
    pub fn host() -> Option<Self> {
        std::env::consts::OS.parse().ok()
    }

    /// File name of a dynamic library called `name` on this OS.
    #[must_use]
    pub fn dylib_name(self, name: &str) -> String {
        match self {
            Self::Windows => format!("{name}.dll"),
            Self::MacOs => format!("lib{name}.dylib"),
            Self::Linux => format!("lib{name}.so"),
        }
    }
}

impl FromStr for Os {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "win" | "windows" => Ok(Self::Windows),
            "macos" | "darwin" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            other => Err(format!(
                "unknown operating system '{other}' (expected windows, macos or linux)"
            )),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        })
    }
}

#[derive(Debug, Parser)]
#[command(name = "brane-make", version)]
#[command(about = "Build and run the BraneScript notebook environment", long_about = None)]
pub struct Cli {
    /// Targets to build
    #[arg(value_name = "TARGET", required_unless_present = "list")]
    pub targets: Vec<String>,

    /// List all known targets and exit
    #[arg(long = "targets")]
    pub list: bool,

    /// Rebuild targets even if they are up to date
    #[arg(short, long)]
    pub force: bool,

    /// Print mutating commands instead of running them
    #[arg(short, long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Architecture to build for (defaults to the host)
    #[arg(short, long, env = "BRANE_ARCH")]
    pub arch: Option<Arch>,

    /// Operating system to build for (defaults to the host)
    #[arg(short, long, env = "BRANE_OS")]
    pub os: Option<Os>,

    /// Compiler library to bundle (defaults to target/release/<libbrane_cli>)
    #[arg(long, env = "BRANE_LIB")]
    pub lib: Option<PathBuf>,

    /// Address of the Brane API service
    #[arg(long, env = "BRANE_API_ADDR", default_value = DEFAULT_API_ADDR)]
    pub api: String,

    /// Address of the Brane driver service
    #[arg(long, env = "BRANE_DRV_ADDR", default_value = DEFAULT_DRV_ADDR)]
    pub drv: String,

    /// Host directory mounted as the notebook data directory
    #[arg(long, env = "BRANE_HOST_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Host directory holding instance certificates
    #[arg(long, env = "BRANE_HOST_CERTS_DIR", default_value = "./certs")]
    pub certs_dir: PathBuf,

    /// Host directory mounted as the notebook directory
    #[arg(long, env = "BRANE_HOST_NOTEBOOK_DIR", default_value = "./notebooks")]
    pub notebook_dir: PathBuf,

    /// Command used to invoke the container engine
    #[arg(long, env = "BRANE_DOCKER_CMD", default_value = "docker")]
    pub docker_cmd: String,

    /// Command used to invoke compose
    #[arg(long, env = "BRANE_COMPOSE_CMD", default_value = "docker compose")]
    pub compose_cmd: String,

    /// Compose file for `up` and `down`
    #[arg(long, env = "BRANE_COMPOSE_FILE", default_value = "docker-compose.yml")]
    pub compose_file: PathBuf,

    /// Tag of the notebook image
    #[arg(long, env = "BRANE_IDE_IMAGE", default_value = "brane-ide:latest")]
    pub image: String,

    /// Name of the notebook container
    #[arg(long, env = "BRANE_IDE_CONTAINER", default_value = "brane-ide")]
    pub container: String,

    /// Host port the notebook is published on
    #[arg(long, env = "BRANE_IDE_PORT", default_value_t = 8888)]
    pub port: u16,
}

/// Per-invocation build switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub arch: Arch,
    pub os: Os,
    pub dry_run: bool,
    pub force: bool,
}

/// Resolved configuration the target table is built from.
#[derive(Debug, Clone)]
pub struct MakeConfig {
    pub options: BuildOptions,
    pub lib: PathBuf,
    pub build_dir: PathBuf,
    pub api: String,
    pub drv: String,
    pub data_dir: PathBuf,
    pub certs_dir: PathBuf,
    pub notebook_dir: PathBuf,
    pub docker_cmd: String,
    pub compose_cmd: String,
    pub compose_file: PathBuf,
    pub image: String,
    pub container: String,
    pub port: u16,
}

impl TryFrom<Cli> for MakeConfig {
    type Error = MakeError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let arch = match cli.arch {
            Some(arch) => arch,
            None => Arch::host().ok_or_else(|| {
                MakeError::Config(format!(
                    "unsupported host architecture '{}', pass --arch",
                    std::env::consts::ARCH
                ))
            })?,
        };
        let os = match cli.os {
            Some(os) => os,
            None => Os::host().ok_or_else(|| {
                MakeError::Config(format!(
                    "unsupported host operating system '{}', pass --os",
                    std::env::consts::OS
                ))
            })?,
        };
        let lib = cli.lib.unwrap_or_else(|| {
            PathBuf::from("target")
                .join("release")
                .join(os.dylib_name("brane_cli"))
        });

        Ok(Self {
            options: BuildOptions {
                arch,
                os,
                dry_run: cli.dry_run,
                force: cli.force,
            },
            lib,
            build_dir: PathBuf::from("build"),
            api: cli.api,
            drv: cli.drv,
            data_dir: cli.data_dir,
            certs_dir: cli.certs_dir,
            notebook_dir: cli.notebook_dir,
            docker_cmd: cli.docker_cmd,
            compose_cmd: cli.compose_cmd,
            compose_file: cli.compose_file,
            image: cli.image,
            container: cli.container,
            port: cli.port,
        })
    }
}
