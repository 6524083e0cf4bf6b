//! Transport layer for the BraneScript kernel.
//!
//! Provides:
//! - `TcpDriverClient` - Driver RPC as newline-delimited JSON over TCP
//! - Front-end wire protocol (JSON lines)
//! - `MessageWriter` - Serialized writer for front-end messages

pub mod client;
pub mod frontend;
pub mod protocol;

pub use client::TcpDriverClient;
pub use frontend::{MessageWriter, forward_output};
pub use protocol::{ClientMessage, DriverRequest, DriverResponse, ServerMessage};
