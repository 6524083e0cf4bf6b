//! BraneScript notebook kernel.
//!
//! Reads `ClientMessage` JSON lines on stdin and writes `ServerMessage`
//! JSON lines on stdout. Logs go to stderr.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use bscript_compiler::{CommandBuilder, CompilerBridge};
use bscript_core::{KernelConfig, MsgStore};
use bscript_kernel::{BraneScriptKernel, KernelInfo};
use bscript_transport::{ClientMessage, MessageWriter, ServerMessage, TcpDriverClient, forward_output};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Token of the request currently executing, if any.
type Running = Arc<Mutex<Option<CancellationToken>>>;

/// Requests handled one at a time by the kernel loop.
enum Request {
    Execute(String),
    Shutdown,
}

fn interrupt(running: &Running) {
    let slot = running.lock().unwrap_or_else(PoisonError::into_inner);
    match slot.as_ref() {
        Some(token) => {
            tracing::info!("Interrupting running request");
            token.cancel();
        }
        None => tracing::debug!("Interrupt with nothing running"),
    }
}

/// Read stdin; answer cheap requests directly and queue the rest.
async fn read_requests(
    writer: MessageWriter,
    info: KernelInfo,
    running: Running,
    tx: mpsc::Sender<Request>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::error!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ClientMessage>(&line) {
            Ok(ClientMessage::Execute { code }) => {
                if tx.send(Request::Execute(code)).await.is_err() {
                    break;
                }
                None
            }
            Ok(ClientMessage::Interrupt) => {
                interrupt(&running);
                None
            }
            Ok(ClientMessage::KernelInfo) => Some(ServerMessage::KernelInfo { info: info.clone() }),
            Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
            Ok(ClientMessage::Shutdown) => break,
            Err(e) => {
                tracing::warn!("Malformed request: {e}");
                Some(ServerMessage::Error {
                    message: format!("Malformed request: {e}"),
                })
            }
        };
        let Some(reply) = reply else { continue };
        if let Err(e) = writer.send(&reply).await {
            tracing::error!("Failed to write reply: {e}");
            break;
        }
    }
    let _ = tx.send(Request::Shutdown).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = KernelConfig::from_env().context("Invalid kernel configuration")?;
    tracing::info!(
        driver = %config.driver_addr,
        api = %config.api_addr,
        data_dir = %config.data_dir.display(),
        "Starting BraneScript kernel"
    );
    if let Some(certs) = &config.certs_dir {
        tracing::debug!(certs = %certs.display(), "Using instance certificates");
    }

    let store = Arc::new(MsgStore::new());
    let writer = MessageWriter::new(tokio::io::stdout());
    let forwarder = forward_output(&store, writer.clone());

    let driver = TcpDriverClient::new(&config.driver_addr);
    let mut kernel = BraneScriptKernel::new(driver, store.clone(), config.data_dir.clone());
    if let Some(command) = &config.compiler {
        tracing::info!(%command, "Compiling snippets before execution");
        kernel = kernel.with_compiler(CompilerBridge::new(
            CommandBuilder::new(command.clone()),
            config.compile_timeout,
        ));
    }

    let running: Running = Arc::new(Mutex::new(None));
    let (tx, mut rx) = mpsc::channel(64);
    let reader = tokio::spawn(read_requests(writer, kernel.info(), running.clone(), tx));

    let ctrl_c_running = running.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupt(&ctrl_c_running);
        }
    });

    while let Some(request) = rx.recv().await {
        match request {
            Request::Execute(code) => {
                let token = CancellationToken::new();
                *running.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
                let result = kernel.execute(&code, &token).await;
                running.lock().unwrap_or_else(PoisonError::into_inner).take();
                tracing::debug!(?result, "Request finished");
            }
            Request::Shutdown => break,
        }
    }

    kernel.shutdown().await;
    reader.abort();
    // Let the forwarder drain what is already queued before we exit.
    drop(kernel);
    drop(store);
    let _ = forwarder.await;
    Ok(())
}
