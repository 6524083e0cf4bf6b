//! The remote execution contract.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque session identifier handed out by the driver.
pub type SessionId = String;

/// One reply record of an execution stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteReply {
    /// Set on the last reply of a stream.
    #[serde(default)]
    pub close: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub debug: String,
    /// Serialized workflow result, if the remote produced one.
    #[serde(default)]
    pub value: String,
}

impl ExecuteReply {
    /// A reply carrying only stdout text.
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            ..Self::default()
        }
    }

    /// Mark this reply as the final one.
    #[must_use]
    pub const fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

/// Ordered stream of replies for one execution request.
pub type ReplyStream = BoxStream<'static, Result<ExecuteReply, DriverError>>;

/// Transport-level driver error.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to connect to driver at '{addr}': {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Status(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed driver message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Driver closed the connection unexpectedly")]
    Closed,
}

impl DriverError {
    /// The detail text shown to the user when a request dies on this error.
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::Status(details) => details.clone(),
            other => other.to_string(),
        }
    }
}

/// Client side of the remote workflow-execution service.
#[async_trait]
pub trait DriverService: Send + Sync {
    /// Create a new remote session.
    async fn create_session(&self) -> Result<SessionId, DriverError>;

    /// Submit `input` for execution within `session`.
    async fn execute(&self, session: &str, input: &str) -> Result<ReplyStream, DriverError>;
}
