//! Notebook kernel for BraneScript.
//!
//! Provides:
//! - `BraneScriptKernel` - Execute cells against a remote driver
//! - Magic command interception
//! - Rendering of file outputs from the data directory

pub mod info;
pub mod kernel;
pub mod magic;
pub mod render;

pub use info::KernelInfo;
pub use kernel::BraneScriptKernel;
pub use magic::{MAGIC_SENTINEL, MagicCommand};
pub use render::{RenderError, try_as_file};
