//! Build runner for the BraneScript notebook environment.
//!
//! Provides:
//! - `Target` - A named buildable unit with a staleness check and a build step
//! - `Builder` - Depth-first dependency walk over the static target table
//! - `CommandRunner` - Seam for external commands (`ProcessRunner` in production)
//! - `Extractor` - Composable text scraping for container logs

pub mod builder;
pub mod config;
pub mod error;
pub mod extract;
pub mod runner;
pub mod table;
pub mod target;

pub use builder::{Builder, MAX_DEPTH};
pub use config::{Arch, BuildOptions, Cli, MakeConfig, Os};
pub use error::MakeError;
pub use extract::Extractor;
pub use runner::{Cmd, CommandOutput, CommandRunner, ProcessRunner};
pub use target::{BuildContext, Target, TargetKind};
