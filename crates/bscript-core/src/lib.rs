//! Core abstractions for the BraneScript notebook kernel.
//!
//! This crate provides the fundamental building blocks:
//! - `MsgStore` - Broadcast + history of kernel output
//! - `KernelMessage` - Typed output message enum
//! - `KernelConfig` - Environment-driven kernel configuration
//! - `DriverService` - The remote execution contract

pub mod config;
pub mod instance;
pub mod message;
pub mod msg_store;
pub mod traits;

pub use config::KernelConfig;
pub use message::{DisplayData, ExecutionResult, ExecutionStatus, KernelMessage, StreamName};
pub use msg_store::MsgStore;
pub use traits::{DriverError, DriverService, ExecuteReply, ReplyStream, SessionId};
