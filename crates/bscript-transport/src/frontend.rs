//! Front-end side of the kernel: JSON lines out.

use std::sync::Arc;

use bscript_core::MsgStore;
use futures::StreamExt;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::Mutex,
};

use crate::protocol::ServerMessage;

/// Serialized writer for front-end messages.
#[derive(Clone)]
pub struct MessageWriter {
    writer: Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>,
}

impl MessageWriter {
    /// Create a new message writer.
    #[must_use]
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(BufWriter::new(Box::new(writer)))),
        }
    }

    /// Write one message as a JSON line.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(message)?;
        let mut guard = self.writer.lock().await;
        guard.write_all(json.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await?;
        Ok(())
    }
}

/// Forward everything published on `store` to `writer` until the store
/// is dropped or the writer fails.
pub fn forward_output(store: &MsgStore, writer: MessageWriter) -> tokio::task::JoinHandle<()> {
    let mut live = store.live_stream();
    tokio::spawn(async move {
        while let Some(message) = live.next().await {
            if let Err(e) = writer.send(&ServerMessage::from(message)).await {
                tracing::error!("Failed to write front-end message: {e}");
                break;
            }
        }
    })
}
