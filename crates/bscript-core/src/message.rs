//! Kernel output messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output stream a text chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Rich display payload, keyed by MIME type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayData {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DisplayData {
    /// Payload with a single MIME representation.
    #[must_use]
    pub fn single(mime: impl Into<String>, value: Value) -> Self {
        let mut data = Map::new();
        data.insert(mime.into(), value);
        Self {
            data,
            metadata: Map::new(),
        }
    }

    /// Look up the representation for `mime`.
    #[must_use]
    pub fn get(&self, mime: &str) -> Option<&Value> {
        self.data.get(mime)
    }
}

/// Final status of an execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Abort,
}

/// Normalized result returned for every execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub execution_count: u64,
}

impl ExecutionResult {
    #[must_use]
    pub const fn complete(execution_count: u64) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            execution_count,
        }
    }

    #[must_use]
    pub const fn aborted(execution_count: u64) -> Self {
        Self {
            status: ExecutionStatus::Abort,
            execution_count,
        }
    }
}

/// A message published by the kernel towards the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelMessage {
    /// Plain text on stdout or stderr.
    Stream { name: StreamName, text: String },
    /// Rich display of a file produced by a workflow.
    DisplayData(DisplayData),
    /// Value produced by the executed snippet.
    ExecuteResult { data: Map<String, Value> },
    /// Intermediate status line, e.g. from the compiler.
    Progress { text: String },
    /// The request has concluded.
    Finished(ExecutionResult),
}

impl KernelMessage {
    /// Stream message, newline-terminated the way notebooks expect.
    #[must_use]
    pub fn stream(name: StreamName, text: &str) -> Self {
        Self::Stream {
            name,
            text: format!("{text}\n"),
        }
    }

    /// Rough byte size, used to bound history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 8;
        match self {
            Self::Stream { text, .. } | Self::Progress { text } => text.len() + OVERHEAD,
            Self::DisplayData(display) => map_bytes(&display.data) + OVERHEAD,
            Self::ExecuteResult { data } => map_bytes(data) + OVERHEAD,
            Self::Finished(_) => OVERHEAD,
        }
    }
}

fn map_bytes(map: &Map<String, Value>) -> usize {
    map.iter()
        .map(|(k, v)| k.len() + v.as_str().map_or_else(|| v.to_string().len(), str::len))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_is_newline_terminated() {
        let msg = KernelMessage::stream(StreamName::Stderr, "boom");
        assert_eq!(
            msg,
            KernelMessage::Stream {
                name: StreamName::Stderr,
                text: "boom\n".to_string()
            }
        );
    }

    #[test]
    fn test_display_data_serialization() {
        let msg = KernelMessage::DisplayData(DisplayData::single(
            "text/html",
            Value::String("<b>hi</b>".into()),
        ));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "display_data");
        assert_eq!(json["data"]["text/html"], "<b>hi</b>");
        assert!(json["metadata"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_finished_serialization() {
        let json = serde_json::to_string(&KernelMessage::Finished(ExecutionResult::aborted(3)))
            .unwrap();
        assert!(json.contains("\"status\":\"abort\""));
        assert!(json.contains("\"execution_count\":3"));
    }
}
