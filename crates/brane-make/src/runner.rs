//! External command execution.

use std::{fmt, process::Stdio};

use async_trait::async_trait;

use crate::error::MakeError;

/// A program with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Split a user-supplied command line such as `sudo docker`.
    ///
    /// # Errors
    /// Returns error if the line cannot be split or is empty.
    pub fn parse(line: &str) -> Result<Self, MakeError> {
        let mut words = shlex::split(line)
            .ok_or_else(|| MakeError::Config(format!("cannot split command line '{line}'")))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| MakeError::Config("empty command line".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words.clone()) {
            Ok(line) => f.write_str(&line),
            Err(_) => f.write_str(&words.collect::<Vec<_>>().join(" ")),
        }
    }
}

/// Captured result of a read-only command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Runs external commands for targets.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` with inherited stdio and extra `env`; returns the exit code.
    async fn run(&self, cmd: &Cmd, env: &[(String, String)]) -> std::io::Result<Option<i32>>;

    /// Run `cmd` and capture its output.
    async fn capture(&self, cmd: &Cmd) -> std::io::Result<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &Cmd, env: &[(String, String)]) -> std::io::Result<Option<i32>> {
        let status = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .status()
            .await?;
        Ok(status.code())
    }

    async fn capture(&self, cmd: &Cmd) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// Records every invocation and answers captures from a canned table.
    #[derive(Clone, Default)]
    pub struct RecordingRunner {
        pub runs: Arc<Mutex<Vec<String>>>,
        pub captures: Arc<Mutex<Vec<String>>>,
        pub outputs: Arc<Mutex<HashMap<String, CommandOutput>>>,
        pub fail: Arc<Mutex<Option<String>>>,
    }

    impl RecordingRunner {
        pub fn answer(&self, cmd: &str, stdout: &str) {
            self.outputs.lock().unwrap().insert(
                cmd.to_string(),
                CommandOutput {
                    code: Some(0),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
        }

        pub fn fail_on(&self, cmd: &str) {
            *self.fail.lock().unwrap() = Some(cmd.to_string());
        }

        pub fn runs(&self) -> Vec<String> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, cmd: &Cmd, _env: &[(String, String)]) -> std::io::Result<Option<i32>> {
            let line = cmd.to_string();
            self.runs.lock().unwrap().push(line.clone());
            if self.fail.lock().unwrap().as_deref() == Some(line.as_str()) {
                return Ok(Some(1));
            }
            Ok(Some(0))
        }

        async fn capture(&self, cmd: &Cmd) -> std::io::Result<CommandOutput> {
            let line = cmd.to_string();
            self.captures.lock().unwrap().push(line.clone());
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .get(&line)
                .cloned()
                .unwrap_or(CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                }))
        }
    }
}
