//! Build runner errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors aborting a build invocation.
#[derive(Debug, Error)]
pub enum MakeError {
    #[error("Unknown target '{0}' (use --targets to list them)")]
    UnknownTarget(String),
    #[error("Command '{command}' failed with {}", describe_exit(.code))]
    CommandFailed { command: String, code: Option<i32> },
    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Dependency chain of '{target}' is deeper than {depth} levels (cyclic dependency?)")]
    RecursionLimit { target: String, depth: usize },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MakeError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(
        || "no exit code (killed by signal)".to_string(),
        |code| format!("exit code {code}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_names_command_line() {
        let err = MakeError::CommandFailed {
            command: "docker build -t brane-ide .".to_string(),
            code: Some(2),
        };
        assert_eq!(
            err.to_string(),
            "Command 'docker build -t brane-ide .' failed with exit code 2"
        );

        let err = MakeError::CommandFailed {
            command: "sleep 100".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("killed by signal"));
    }
}
