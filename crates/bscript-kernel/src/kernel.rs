//! The BraneScript kernel: cells in, remote workflow output out.

use std::{path::PathBuf, sync::Arc};

use bscript_compiler::{CompilerBridge, CompilerError};
use bscript_core::{
    DriverService, ExecuteReply, ExecutionResult, ExecutionStatus, MsgStore, SessionId,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    info::KernelInfo,
    magic::{self, MagicCommand},
    render,
};

/// Magic commands the kernel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Magic {
    /// `attach <session-id>`: reuse an existing remote session.
    Attach,
    /// `session`: print the current session id.
    Session,
}

impl Magic {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "attach" => Some(Self::Attach),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// Notebook kernel bound to one remote driver.
///
/// Owns the remote session id and the compiler process for its whole
/// lifetime. All output is published on the shared [`MsgStore`].
pub struct BraneScriptKernel<D>
where
    D: DriverService,
{
    driver: D,
    store: Arc<MsgStore>,
    data_dir: PathBuf,
    compiler: Option<CompilerBridge>,
    session: Option<SessionId>,
    execution_count: u64,
}

impl<D> BraneScriptKernel<D>
where
    D: DriverService,
{
    /// Create a kernel that sends snippets to `driver` uncompiled.
    #[must_use]
    pub fn new(driver: D, store: Arc<MsgStore>, data_dir: PathBuf) -> Self {
        Self {
            driver,
            store,
            data_dir,
            compiler: None,
            session: None,
            execution_count: 0,
        }
    }

    /// Compile every snippet with `compiler` before sending it.
    #[must_use]
    pub fn with_compiler(mut self, compiler: CompilerBridge) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// The current remote session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Identification of this kernel.
    #[must_use]
    pub fn info(&self) -> KernelInfo {
        KernelInfo::default()
    }

    /// Execute one cell.
    ///
    /// Output is published on the message store as it arrives, followed by
    /// a `Finished` message carrying the returned result. Errors never
    /// escape: they are published as stderr and the kernel stays usable.
    pub async fn execute(&mut self, code: &str, cancel: &CancellationToken) -> ExecutionResult {
        self.execution_count += 1;
        tracing::info!("Handling execute request {}", self.execution_count);

        let status = self.run(code, cancel).await;
        let result = ExecutionResult {
            status,
            execution_count: self.execution_count,
        };
        self.store.push_finished(result);
        result
    }

    /// Run magic commands in `text` and return the remaining text.
    pub fn intercept_magic(&mut self, text: &str) -> String {
        let (cleaned, commands) = magic::strip_magic(text);
        for command in commands {
            self.run_magic(&command);
        }
        cleaned
    }

    /// Release the compiler process.
    pub async fn shutdown(&mut self) {
        tracing::info!("Terminating BraneScript kernel...");
        if let Some(compiler) = self.compiler.as_mut() {
            compiler.shutdown().await;
        }
    }

    fn run_magic(&mut self, command: &MagicCommand) {
        let Some(magic) = Magic::lookup(&command.name) else {
            tracing::debug!(name = %command.name, "Ignoring unknown magic command");
            return;
        };

        match magic {
            Magic::Attach => match command.args.first() {
                Some(id) => {
                    tracing::info!(session = %id, "Attaching to session");
                    self.session = Some(id.clone());
                }
                None => tracing::warn!("'attach' needs a session id; ignoring"),
            },
            Magic::Session => match &self.session {
                Some(id) => self.store.push_stdout(id),
                None => self.store.push_stderr("No session attached"),
            },
        }
    }

    async fn run(&mut self, code: &str, cancel: &CancellationToken) -> ExecutionStatus {
        if code.trim().is_empty() {
            return ExecutionStatus::Ok;
        }
        let code = self.intercept_magic(code);
        if code.trim().is_empty() {
            return ExecutionStatus::Ok;
        }

        let input = match self.compile(code, cancel).await {
            Ok(Some(input)) => input,
            Ok(None) => return ExecutionStatus::Ok,
            Err(CompilerError::Cancelled) => return ExecutionStatus::Abort,
            Err(e) => {
                tracing::error!("Compiler failure: {e}");
                self.store.push_stderr(&e.to_string());
                return ExecutionStatus::Ok;
            }
        };

        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(details) => {
                self.store.push_stderr(&details);
                return ExecutionStatus::Ok;
            }
        };

        let mut stream = match self.driver.execute(&session, &input).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Execute request failed: {e}");
                self.store.push_stderr(&e.details());
                return ExecutionStatus::Ok;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Execution interrupted");
                    return ExecutionStatus::Abort;
                }
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    tracing::error!("Reply stream failed: {e}");
                    self.store.push_stderr(&e.details());
                    break;
                }
                Some(Ok(reply)) => {
                    let close = reply.close;
                    self.publish_reply(reply).await;
                    if close {
                        break;
                    }
                }
            }
        }

        ExecutionStatus::Ok
    }

    /// Compile `code` if a compiler is configured; `None` means the compiler
    /// rejected it and has already said why.
    async fn compile(
        &mut self,
        code: String,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CompilerError> {
        let Some(compiler) = self.compiler.as_mut() else {
            return Ok(Some(code));
        };

        tracing::debug!("Compiling input snippet...");
        let Some(output) = compiler.compile(&code, &self.store, cancel).await? else {
            return Ok(None);
        };
        if !output.warnings.trim().is_empty() {
            self.store.push_stderr(output.warnings.trim_end());
        }
        Ok(Some(output.compiled))
    }

    async fn ensure_session(&mut self) -> Result<SessionId, String> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        match self.driver.create_session().await {
            Ok(session) => {
                tracing::info!(%session, "Created remote session");
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                tracing::error!("Failed to create session: {e}");
                Err(e.details())
            }
        }
    }

    async fn publish_reply(&self, reply: ExecuteReply) {
        if !reply.debug.is_empty() {
            tracing::info!(target: "remote", "Remote: {}", reply.debug);
        }

        match render::try_as_file(&reply.stdout, &self.data_dir).await {
            Ok(Some(display)) => {
                self.store.push_display(display);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Cannot render file output: {e}");
                self.store.push_stderr(&e.to_string());
                return;
            }
        }

        if !reply.stdout.is_empty() {
            self.store.push_stdout(&reply.stdout);
        }
        if !reply.stderr.is_empty() {
            self.store.push_stderr(&reply.stderr);
        }
        if !reply.value.is_empty() {
            self.store.push_result(&reply.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use bscript_core::{DriverError, KernelMessage, ReplyStream, StreamName};
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeDriver {
        created: AtomicUsize,
        calls: Mutex<Vec<(String, String)>>,
        replies: Vec<ExecuteReply>,
        fail_with: Option<String>,
        hang: bool,
    }

    impl FakeDriver {
        fn replying(replies: Vec<ExecuteReply>) -> Self {
            Self {
                replies,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DriverService for FakeDriver {
        async fn create_session(&self) -> Result<SessionId, DriverError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("session-{n}"))
        }

        async fn execute(&self, session: &str, input: &str) -> Result<ReplyStream, DriverError> {
            self.calls
                .lock()
                .unwrap()
                .push((session.to_string(), input.to_string()));
            if self.hang {
                return Ok(futures::stream::pending().boxed());
            }
            let mut items: Vec<Result<ExecuteReply, DriverError>> =
                self.replies.iter().cloned().map(Ok).collect();
            if let Some(details) = &self.fail_with {
                items.push(Err(DriverError::Status(details.clone())));
            }
            Ok(futures::stream::iter(items).boxed())
        }
    }

    fn kernel(driver: FakeDriver, data_dir: PathBuf) -> (BraneScriptKernel<FakeDriver>, Arc<MsgStore>) {
        let store = Arc::new(MsgStore::new());
        (
            BraneScriptKernel::new(driver, Arc::clone(&store), data_dir),
            store,
        )
    }

    fn without_finished(store: &MsgStore) -> Vec<KernelMessage> {
        store
            .get_history()
            .into_iter()
            .filter(|m| !matches!(m, KernelMessage::Finished(_)))
            .collect()
    }

    #[test]
    fn test_info_names_language() {
        let (kernel, _) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        let info = kernel.info();
        assert_eq!(info.language_info.name, "BraneScript");
        assert_eq!(info.language_info.file_extension, ".bs");
    }

    #[tokio::test]
    async fn test_blank_and_magic_only_cells_never_reach_driver() {
        let (mut kernel, store) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        let cancel = CancellationToken::new();

        let result = kernel.execute("  \n\t", &cancel).await;
        assert_eq!(result, ExecutionResult::complete(1));
        let result = kernel.execute("//! attach abc\n//! bogus 1 2", &cancel).await;
        assert_eq!(result, ExecutionResult::complete(2));

        assert!(kernel.driver.calls().is_empty());
        assert_eq!(kernel.driver.created.load(Ordering::SeqCst), 0);
        assert_eq!(kernel.session(), Some("abc"));
        assert!(without_finished(&store).is_empty());
    }

    #[tokio::test]
    async fn test_session_created_once_and_reused() {
        let (mut kernel, _store) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        let cancel = CancellationToken::new();

        kernel.execute("println(1);", &cancel).await;
        kernel.execute("println(2);", &cancel).await;

        assert_eq!(kernel.driver.created.load(Ordering::SeqCst), 1);
        assert_eq!(
            kernel.driver.calls(),
            vec![
                ("session-0".to_string(), "println(1);".to_string()),
                ("session-0".to_string(), "println(2);".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_attach_overrides_session_verbatim() {
        let (mut kernel, store) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        let cancel = CancellationToken::new();

        kernel
            .execute("//! attach 7f3e-given\nprintln(1);\n//! session", &cancel)
            .await;

        assert_eq!(kernel.driver.created.load(Ordering::SeqCst), 0);
        assert_eq!(
            kernel.driver.calls(),
            vec![("7f3e-given".to_string(), "println(1);\n".to_string())]
        );
        assert_eq!(
            without_finished(&store),
            vec![KernelMessage::stream(StreamName::Stdout, "7f3e-given")]
        );
    }

    #[tokio::test]
    async fn test_session_magic_without_session() {
        let (mut kernel, store) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        kernel.intercept_magic("//! session\n");
        assert_eq!(
            store.get_history(),
            vec![KernelMessage::stream(StreamName::Stderr, "No session attached")]
        );
    }

    #[tokio::test]
    async fn test_reply_fields_become_streams() {
        let driver = FakeDriver::replying(vec![
            ExecuteReply::stdout("hello"),
            ExecuteReply {
                stderr: "careful".to_string(),
                value: "42".to_string(),
                ..ExecuteReply::default()
            }
            .closing(),
            ExecuteReply::stdout("after close"),
        ]);
        let (mut kernel, store) = kernel(driver, PathBuf::from("/nonexistent"));

        let result = kernel.execute("f();", &CancellationToken::new()).await;
        assert_eq!(result.status, ExecutionStatus::Ok);

        let history = without_finished(&store);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], KernelMessage::stream(StreamName::Stdout, "hello"));
        assert_eq!(history[1], KernelMessage::stream(StreamName::Stderr, "careful"));
        let KernelMessage::ExecuteResult { data } = &history[2] else {
            panic!("Wrong message type");
        };
        assert_eq!(data["text/plain"], "42");
    }

    #[tokio::test]
    async fn test_debug_only_reply_is_logged_not_streamed() {
        let driver = FakeDriver::replying(vec![ExecuteReply {
            debug: "scheduling task".to_string(),
            ..ExecuteReply::default()
        }]);
        let (mut kernel, store) = kernel(driver, PathBuf::from("/nonexistent"));

        kernel.execute("f();", &CancellationToken::new()).await;
        assert!(without_finished(&store).is_empty());
    }

    #[tokio::test]
    async fn test_file_output_is_rendered() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("report.json"), r#"{"a":1}"#).unwrap();
        let driver = FakeDriver::replying(vec![
            ExecuteReply::stdout("file:///data/report.json").closing(),
        ]);
        let (mut kernel, store) = kernel(driver, tmp.path().to_path_buf());

        kernel.execute("commit_result(r);", &CancellationToken::new()).await;

        let history = without_finished(&store);
        assert_eq!(history.len(), 1);
        let KernelMessage::DisplayData(display) = &history[0] else {
            panic!("Wrong message type");
        };
        assert_eq!(display.get("application/json"), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_file_errors_are_reported_and_stream_continues() {
        let driver = FakeDriver::replying(vec![
            ExecuteReply::stdout("file:///etc/passwd"),
            ExecuteReply::stdout("still here"),
        ]);
        let (mut kernel, store) = kernel(driver, PathBuf::from("/nonexistent"));

        kernel.execute("f();", &CancellationToken::new()).await;

        let history = without_finished(&store);
        assert_eq!(history.len(), 2);
        let KernelMessage::Stream { name, text } = &history[0] else {
            panic!("Wrong message type");
        };
        assert_eq!(*name, StreamName::Stderr);
        assert!(text.contains("does not live in data directory"));
        assert_eq!(history[1], KernelMessage::stream(StreamName::Stdout, "still here"));
    }

    #[tokio::test]
    async fn test_transport_error_is_single_terminal_status() {
        let driver = FakeDriver {
            replies: vec![ExecuteReply::stdout("partial")],
            fail_with: Some("connection reset by driver".to_string()),
            ..FakeDriver::default()
        };
        let (mut kernel, store) = kernel(driver, PathBuf::from("/nonexistent"));

        let result = kernel.execute("f();", &CancellationToken::new()).await;
        assert_eq!(result.status, ExecutionStatus::Ok);
        assert_eq!(
            store.get_history(),
            vec![
                KernelMessage::stream(StreamName::Stdout, "partial"),
                KernelMessage::stream(StreamName::Stderr, "connection reset by driver"),
                KernelMessage::Finished(ExecutionResult::complete(1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_interrupt_aborts() {
        let driver = FakeDriver {
            hang: true,
            ..FakeDriver::default()
        };
        let (mut kernel, store) = kernel(driver, PathBuf::from("/nonexistent"));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = kernel.execute("sleep(1000);", &cancel).await;
        assert_eq!(result, ExecutionResult::aborted(1));
        assert_eq!(
            store.get_history().last(),
            Some(&KernelMessage::Finished(ExecutionResult::aborted(1)))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compiled_form_is_sent() {
        use std::time::Duration;

        use bscript_compiler::CommandBuilder;

        let compiler = CompilerBridge::new(
            CommandBuilder::new(
                r#"sh -c 'while read -r l; do echo "asm:$l"; echo "---END---"; done'"#,
            ),
            Duration::from_secs(5),
        );
        let (kernel, _store) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        let mut kernel = kernel.with_compiler(compiler);

        kernel.execute("println(1);", &CancellationToken::new()).await;
        assert_eq!(
            kernel.driver.calls(),
            vec![("session-0".to_string(), "asm:println(1);\n".to_string())]
        );
        kernel.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compile_error_skips_driver() {
        use std::time::Duration;

        use bscript_compiler::CommandBuilder;

        let compiler = CompilerBridge::new(
            CommandBuilder::new(
                r#"sh -c 'while read -r l; do echo "syntax error" >&2; echo "---ERROR---" >&2; done'"#,
            ),
            Duration::from_secs(5),
        );
        let (kernel, store) = kernel(FakeDriver::default(), PathBuf::from("/nonexistent"));
        let mut kernel = kernel.with_compiler(compiler);

        let result = kernel.execute("println(", &CancellationToken::new()).await;
        assert_eq!(result.status, ExecutionStatus::Ok);
        assert!(kernel.driver.calls().is_empty());
        assert!(
            store
                .get_history()
                .contains(&KernelMessage::stream(StreamName::Stderr, "syntax error"))
        );
        kernel.shutdown().await;
    }
}
