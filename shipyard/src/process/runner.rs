//! Command runner trait and the tokio-backed implementation

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::errors::EngineError;

/// A single external command invocation
#[derive(Clone, Default)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment; credentials travel here, never in `args`
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub stdin: Option<String>,
    /// Hard limit for the invocation; `None` runs to completion
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments, for messages and logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

// Environment values and stdin may hold credentials.
impl fmt::Debug for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut env_keys: Vec<&String> = self.env.keys().collect();
        env_keys.sort();
        f.debug_struct("ProcessCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("working_dir", &self.working_dir)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion (or until its timeout).
    ///
    /// A missing binary is reported as [`EngineError::ToolNotFound`]; a
    /// non-zero exit is *not* an error here and is left to the caller.
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, EngineError>;
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, EngineError> {
        debug!("Executing: {}", command.display());
        trace!("Environment keys: {:?}", command.env.keys().collect::<Vec<_>>());

        if let Some(dir) = &command.working_dir {
            if !dir.is_dir() {
                return Err(EngineError::Configuration(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::ToolNotFound {
                    tool: command.program.clone(),
                }
            } else {
                EngineError::Io(e)
            }
        })?;

        if let Some(input) = &command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                // dropping the handle closes the pipe
            }
        }

        let wait = child.wait_with_output();
        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| EngineError::Timeout {
                    operation: command.display(),
                    after: limit,
                })??,
            None => wait.await?,
        };

        let result = ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            "Finished: {} (exit code {:?})",
            command.program, result.exit_code
        );
        Ok(result)
    }
}
