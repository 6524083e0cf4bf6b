//! Line-protocol bridge to an external BraneScript compiler.
//!
//! Provides:
//! - `CompilerBridge` - Long-lived compiler process with sentinel protocol
//! - Command building and executable resolution utilities

pub mod bridge;
pub mod command;
pub mod resolve;

pub use bridge::{CompileOutput, CompilerBridge, CompilerError, END_SENTINEL, ERROR_SENTINEL};
pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use resolve::resolve_executable_path;
