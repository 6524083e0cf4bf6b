//! Wire protocols: front-end <-> kernel and kernel <-> driver.

use bscript_core::{ExecuteReply, ExecutionStatus, KernelMessage};
use bscript_kernel::KernelInfo;
use serde::{Deserialize, Serialize};

/// Message from the front-end to the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Execute a cell.
    Execute { code: String },
    /// Ask for kernel identification.
    KernelInfo,
    /// Interrupt the running cell.
    Interrupt,
    /// Ping for keepalive.
    Ping,
    /// Stop the kernel.
    Shutdown,
}

/// Message from the kernel to the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Output of the running cell.
    Output { message: KernelMessage },
    /// The running cell has concluded.
    ExecuteReply {
        status: ExecutionStatus,
        execution_count: u64,
    },
    /// Kernel identification.
    KernelInfo { info: KernelInfo },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl From<KernelMessage> for ServerMessage {
    fn from(message: KernelMessage) -> Self {
        match message {
            KernelMessage::Finished(result) => Self::ExecuteReply {
                status: result.status,
                execution_count: result.execution_count,
            },
            message => Self::Output { message },
        }
    }
}

/// Request from the kernel to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverRequest {
    /// Open a new session.
    CreateSession,
    /// Run `input` within session `uuid`.
    Execute { uuid: String, input: String },
}

/// Response from the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverResponse {
    /// Answer to `CreateSession`.
    Session { uuid: String },
    /// One reply of an execution stream.
    Reply(ExecuteReply),
    /// Request failed remotely.
    Error { details: String },
}
