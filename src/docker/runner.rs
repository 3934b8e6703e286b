//! Process spawning seam.
//!
//! Every `docker` and `docker compose` invocation is described as a
//! [`CommandSpec`] and executed by a [`CommandRunner`]. The production
//! runner spawns real processes; tests plug in a recording fake.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

use crate::error::DockerError;

/// How a command's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture stdout and stderr for the caller.
    Capture,
    /// Stream to the terminal; only the exit status comes back.
    Inherit,
}

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to run.
    pub program: String,
    /// Arguments, passed without a shell.
    pub args: Vec<String>,
    /// Extra environment for the child process.
    pub envs: Vec<(String, String)>,
    /// Output handling.
    pub output: OutputMode,
    /// Optional time limit.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Creates a captured command.
    #[must_use]
    pub fn new<I, A>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            output: OutputMode::Capture,
            timeout: None,
        }
    }

    /// Streams output to the terminal instead of capturing it.
    #[must_use]
    pub const fn inherit(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Sets an environment variable on the child process.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Sets a time limit.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The command line for logs and errors. Environment values are never shown.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| {
                if a.contains('\n') {
                    "<script>"
                } else {
                    a.as_str()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of running a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Turns a non-zero exit into [`DockerError::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error naming the command if it did not succeed.
    pub fn check(self, spec: &CommandSpec) -> Result<Self, DockerError> {
        if self.success() {
            Ok(self)
        } else {
            Err(DockerError::failed(spec.display(), &self.stderr, self.status))
        }
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion.
    ///
    /// A non-zero exit is not an error at this level; only failing to
    /// start or timing out is.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DockerError>;
}

/// Runner that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new process runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DockerError> {
        debug!("Running: {}", spec.display());

        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match spec.output {
            OutputMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                let future = command.output();
                let output = match spec.timeout {
                    Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
                        DockerError::Timeout {
                            command: spec.display(),
                            timeout_secs: limit.as_secs(),
                        }
                    })?,
                    None => future.await,
                }
                .map_err(|e| DockerError::exec_failed(spec.display(), &e))?;

                CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            OutputMode::Inherit => {
                command.stdin(Stdio::inherit());
                let status = command
                    .status()
                    .await
                    .map_err(|e| DockerError::exec_failed(spec.display(), &e))?;

                CommandOutput {
                    status: status.code(),
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
        };

        debug!("Exit status {:?}: {}", output.status, spec.display());
        Ok(output)
    }
}
