//! Long-lived compiler process speaking a sentinel-terminated line protocol.
//!
//! Each snippet is written to the compiler's stdin followed by a newline.
//! The compiler answers with any number of lines on stdout and stderr and
//! finishes with [`END_SENTINEL`] (stdout holds the compiled form) or
//! [`ERROR_SENTINEL`] (stderr holds the diagnostics).

use std::{process::Stdio, time::Duration};

use bscript_core::MsgStore;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{ChildStderr, ChildStdin, ChildStdout, Command},
};
use tokio_util::sync::CancellationToken;

use crate::command::{CommandBuildError, CommandBuilder};

/// Marks a successful compilation.
pub const END_SENTINEL: &str = "---END---";
/// Marks a failed compilation.
pub const ERROR_SENTINEL: &str = "---ERROR---";

/// How long to wait for output left over from the previous snippet.
const STALE_OUTPUT_GRACE: Duration = Duration::from_millis(50);

/// Compiler bridge error.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Compiler exited with {}:\n{output}", describe_exit(.code))]
    Exited { code: Option<i32>, output: String },
    #[error("Compiler did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Compilation was interrupted")]
    Cancelled,
    #[error("Failed to spawn compiler: {0}")]
    Spawn(String),
    #[error("Compiler command error: {0}")]
    Command(#[from] CommandBuildError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// What the compiler printed on stdout.
    pub compiled: String,
    /// What the compiler printed on stderr.
    pub warnings: String,
}

struct CompilerProcess {
    child: AsyncGroupChild,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    /// Set once a snippet has been sent.
    used: bool,
}

impl Drop for CompilerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Failed to kill compiler process group: {e}");
        }
    }
}

enum Event {
    Stdout(Option<String>),
    Stderr(Option<String>),
}

/// Bridge to a compiler subprocess, spawned on first use.
pub struct CompilerBridge {
    command: CommandBuilder,
    timeout: Duration,
    process: Option<CompilerProcess>,
}

impl CompilerBridge {
    /// Create a bridge that will run `command` when first needed.
    #[must_use]
    pub const fn new(command: CommandBuilder, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            process: None,
        }
    }

    /// Compile one snippet.
    ///
    /// Every line the compiler prints is published as progress on `store`.
    /// Returns `None` when the compiler reported an error; its diagnostics
    /// have then already been published as stderr.
    ///
    /// # Errors
    /// Returns error if the process died, did not answer in time, or the
    /// request was cancelled. The process is discarded in those cases and
    /// respawned on the next call.
    pub async fn compile(
        &mut self,
        text: &str,
        store: &MsgStore,
        cancel: &CancellationToken,
    ) -> Result<Option<CompileOutput>, CompilerError> {
        if self.process.is_none() {
            self.process = Some(self.spawn().await?);
        }
        let Some(process) = self.process.as_mut() else {
            return Err(CompilerError::Spawn("compiler process unavailable".to_string()));
        };

        let result = exchange(process, text, self.timeout, store, cancel).await;
        if result.is_err() {
            self.process = None;
        }
        result
    }

    /// Kill the compiler process, if any.
    pub async fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.child.kill().await {
                tracing::debug!("Failed to kill compiler: {e}");
            }
        }
    }

    async fn spawn(&self) -> Result<CompilerProcess, CompilerError> {
        let (program, args) = self.command.build()?.into_resolved().await?;
        tracing::info!(program = %program.display(), ?args, "Spawning compiler");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .group_spawn()
            .map_err(|e| CompilerError::Spawn(format!("{}: {e}", program.display())))?;

        let inner = child.inner();
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (inner.stdin.take(), inner.stdout.take(), inner.stderr.take())
        else {
            return Err(CompilerError::Spawn("compiler pipes unavailable".to_string()));
        };

        Ok(CompilerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            used: false,
        })
    }
}

async fn exchange(
    process: &mut CompilerProcess,
    text: &str,
    timeout: Duration,
    store: &MsgStore,
    cancel: &CancellationToken,
) -> Result<Option<CompileOutput>, CompilerError> {
    if let Some(status) = process.child.try_wait()? {
        return Err(exited(process, status.code(), timeout).await);
    }

    if process.used {
        discard_stale_output(process).await;
    }
    process.used = true;

    if let Err(e) = write_snippet(&mut process.stdin, text).await {
        tracing::debug!("Compiler stdin closed: {e}");
        let code = process.child.wait().await?.code();
        return Err(exited(process, code, timeout).await);
    }

    let mut compiled = String::new();
    let mut errors = String::new();
    let (mut stdout_open, mut stderr_open) = (true, true);

    loop {
        if !stdout_open && !stderr_open {
            let code = process.child.wait().await?.code();
            return Err(CompilerError::Exited {
                code,
                output: join_output(&compiled, &errors),
            });
        }

        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CompilerError::Cancelled),
            event = tokio::time::timeout(timeout, async {
                tokio::select! {
                    line = process.stdout.next_line(), if stdout_open => line.map(Event::Stdout),
                    line = process.stderr.next_line(), if stderr_open => line.map(Event::Stderr),
                }
            }) => event.map_err(|_| CompilerError::Timeout(timeout))??,
        };

        match event {
            Event::Stdout(None) => stdout_open = false,
            Event::Stderr(None) => stderr_open = false,
            Event::Stdout(Some(line)) | Event::Stderr(Some(line)) if line == END_SENTINEL => {
                tracing::debug!("Compilation finished");
                return Ok(Some(CompileOutput {
                    compiled,
                    warnings: errors,
                }));
            }
            Event::Stdout(Some(line)) | Event::Stderr(Some(line)) if line == ERROR_SENTINEL => {
                tracing::debug!("Compilation failed");
                store.push_stderr(errors.trim_end());
                return Ok(None);
            }
            Event::Stdout(Some(line)) => {
                tracing::trace!(target: "compiler", "stdout: {line}");
                store.push_progress(line.clone());
                compiled.push_str(&line);
                compiled.push('\n');
            }
            Event::Stderr(Some(line)) => {
                tracing::trace!(target: "compiler", "stderr: {line}");
                store.push_progress(line.clone());
                errors.push_str(&line);
                errors.push('\n');
            }
        }
    }
}

/// Drop lines printed after the previous snippet's sentinel.
async fn discard_stale_output(process: &mut CompilerProcess) {
    let (mut stdout_open, mut stderr_open) = (true, true);
    while stdout_open || stderr_open {
        let read = tokio::time::timeout(STALE_OUTPUT_GRACE, async {
            tokio::select! {
                line = process.stdout.next_line(), if stdout_open => line.map(Event::Stdout),
                line = process.stderr.next_line(), if stderr_open => line.map(Event::Stderr),
            }
        })
        .await;
        match read {
            Err(_) | Ok(Err(_)) => break,
            Ok(Ok(Event::Stdout(None))) => stdout_open = false,
            Ok(Ok(Event::Stderr(None))) => stderr_open = false,
            Ok(Ok(Event::Stdout(Some(line)) | Event::Stderr(Some(line)))) => {
                tracing::debug!(target: "compiler", "Discarding stale output: {line}");
            }
        }
    }
}

async fn write_snippet(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Collect whatever the dead process left in its pipes.
async fn exited(process: &mut CompilerProcess, code: Option<i32>, timeout: Duration) -> CompilerError {
    let mut out = String::new();
    let mut err = String::new();
    let drain = async {
        while let Ok(Some(line)) = process.stdout.next_line().await {
            out.push_str(&line);
            out.push('\n');
        }
        while let Ok(Some(line)) = process.stderr.next_line().await {
            err.push_str(&line);
            err.push('\n');
        }
    };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        tracing::warn!("Timed out collecting output of exited compiler");
    }
    CompilerError::Exited {
        code,
        output: join_output(&out, &err),
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(
        || "no exit code (killed by signal)".to_string(),
        |code| format!("exit code {code}"),
    )
}

fn join_output(stdout: &str, stderr: &str) -> String {
    let mut output = String::from(stdout.trim_end());
    if !output.is_empty() && !stderr.trim().is_empty() {
        output.push('\n');
    }
    output.push_str(stderr.trim_end());
    output
}
