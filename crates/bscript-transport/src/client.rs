//! Driver client speaking newline-delimited JSON over TCP.
//!
//! Every call opens its own connection, writes one [`DriverRequest`] line
//! and reads [`DriverResponse`] lines until the driver closes the stream.

use async_trait::async_trait;
use bscript_core::{DriverError, DriverService, ExecuteReply, ReplyStream, SessionId};
use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::protocol::{DriverRequest, DriverResponse};

/// Schemes accepted in front of a driver address.
const SCHEMES: &[&str] = &["grpc://", "http://", "tcp://"];

/// TCP client for the remote driver.
#[derive(Debug, Clone)]
pub struct TcpDriverClient {
    addr: String,
}

impl TcpDriverClient {
    /// Create a client for `addr` (`host:port`, optionally with a scheme).
    #[must_use]
    pub fn new(addr: &str) -> Self {
        let addr = SCHEMES
            .iter()
            .find_map(|scheme| addr.strip_prefix(scheme))
            .unwrap_or(addr)
            .trim_end_matches('/')
            .to_string();
        Self { addr }
    }

    /// The `host:port` this client connects to.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn request(
        &self,
        request: &DriverRequest,
    ) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf), DriverError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| DriverError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (reader, mut writer) = stream.into_split();

        let json = serde_json::to_string(request)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        Ok((BufReader::new(reader).lines(), writer))
    }
}

async fn next_response(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
) -> Result<Option<DriverResponse>, DriverError> {
    loop {
        match lines.next_line().await? {
            Some(line) if line.trim().is_empty() => {}
            Some(line) => return Ok(Some(serde_json::from_str(&line)?)),
            None => return Ok(None),
        }
    }
}

fn into_reply(response: DriverResponse) -> Result<ExecuteReply, DriverError> {
    match response {
        DriverResponse::Reply(reply) => Ok(reply),
        DriverResponse::Error { details } => Err(DriverError::Status(details)),
        DriverResponse::Session { .. } => Err(DriverError::Status(
            "unexpected session message in reply stream".to_string(),
        )),
    }
}

#[async_trait]
impl DriverService for TcpDriverClient {
    async fn create_session(&self) -> Result<SessionId, DriverError> {
        let (mut lines, _writer) = self.request(&DriverRequest::CreateSession).await?;
        match next_response(&mut lines).await? {
            Some(DriverResponse::Session { uuid }) => Ok(uuid),
            Some(DriverResponse::Error { details }) => Err(DriverError::Status(details)),
            Some(DriverResponse::Reply(_)) => Err(DriverError::Status(
                "unexpected reply to session request".to_string(),
            )),
            None => Err(DriverError::Closed),
        }
    }

    async fn execute(&self, session: &str, input: &str) -> Result<ReplyStream, DriverError> {
        let request = DriverRequest::Execute {
            uuid: session.to_string(),
            input: input.to_string(),
        };
        let connection = self.request(&request).await?;
        tracing::debug!(addr = %self.addr, %session, "Execute request sent");

        // The write half rides along so the connection stays fully open.
        let stream = futures::stream::unfold(Some(connection), |state| async move {
            let (mut lines, writer) = state?;
            match next_response(&mut lines).await {
                Ok(Some(response)) => match into_reply(response) {
                    Ok(reply) => Some((Ok(reply), Some((lines, writer)))),
                    Err(e) => Some((Err(e), None)),
                },
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        });
        Ok(stream.boxed())
    }
}
