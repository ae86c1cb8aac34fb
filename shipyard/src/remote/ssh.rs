//! SSH command execution and SFTP file transfer

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::errors::EngineError;
use crate::process::{CommandRunner, ProcessCommand, ProcessOutput};

/// ssh reserves this exit code for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Host, login and key for one remote machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
}

impl RemoteTarget {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            key_path: key_path.into(),
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Output of a remote command that ran (whatever its exit code)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs commands and moves files on remote hosts through the ssh/sftp clients
pub struct SshExecutor {
    runner: Arc<dyn CommandRunner>,
    ssh_binary: String,
    sftp_binary: String,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ssh_binary: impl Into<String>,
        sftp_binary: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            ssh_binary: ssh_binary.into(),
            sftp_binary: sftp_binary.into(),
            connect_timeout,
        }
    }

    /// Run `command` on the target.
    ///
    /// A missing key, a connection timeout and a rejected key are returned
    /// as distinct errors. Once connected, the command's own exit code is
    /// reported in the output rather than as an error.
    pub async fn execute(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, EngineError> {
        self.check_key(target).await?;
        debug!("ssh {}: {}", target.destination(), command);

        let cmd = ProcessCommand::new(&self.ssh_binary)
            .args(self.common_options(target))
            .arg(target.destination())
            .arg(command)
            .timeout(timeout);

        let output = self.run_logged(target, cmd).await?;
        if output.exit_code == Some(SSH_ERROR_EXIT) {
            let err = self.classify_failure(target, &output);
            error!("ssh to {} failed: {}", target.host, err);
            return Err(err);
        }

        Ok(RemoteOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }

    /// Copy a local file to `remote_path` on the target
    pub async fn upload_file(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), EngineError> {
        if tokio::fs::metadata(local_path).await.is_err() {
            return Err(EngineError::Configuration(format!(
                "upload source does not exist: {}",
                local_path.display()
            )));
        }
        let batch = format!("put \"{}\" \"{}\"\n", local_path.display(), remote_path);
        self.sftp(target, "sftp put", batch).await?;
        info!("Uploaded {} to {}:{}", local_path.display(), target.host, remote_path);
        Ok(())
    }

    /// Copy `remote_path` from the target to a local file
    pub async fn download_file(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), EngineError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let batch = format!("get \"{}\" \"{}\"\n", remote_path, local_path.display());
        self.sftp(target, "sftp get", batch).await?;
        info!("Downloaded {}:{} to {}", target.host, remote_path, local_path.display());
        Ok(())
    }

    async fn sftp(
        &self,
        target: &RemoteTarget,
        label: &str,
        batch: String,
    ) -> Result<(), EngineError> {
        self.check_key(target).await?;

        let cmd = ProcessCommand::new(&self.sftp_binary)
            .args(["-b", "-"])
            .args(self.common_options(target))
            .arg(target.destination())
            .stdin(batch)
            // transfers are bounded by the connect timeout plus a generous margin
            .timeout(self.connect_timeout + Duration::from_secs(300));

        let output = self.run_logged(target, cmd).await?;
        if output.success() {
            return Ok(());
        }

        let err = match self.classify_failure(target, &output) {
            EngineError::ConnectionFailed { .. } if output.exit_code != Some(SSH_ERROR_EXIT) => {
                EngineError::execution(label, output.exit_code)
            }
            other => other,
        };
        error!("{} on {} failed: {}", label, target.host, err);
        Err(err)
    }

    async fn check_key(&self, target: &RemoteTarget) -> Result<(), EngineError> {
        match tokio::fs::metadata(&target.key_path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => {
                error!("Private key not found: {}", target.key_path.display());
                Err(EngineError::KeyFileMissing {
                    path: target.key_path.clone(),
                })
            }
        }
    }

    async fn run_logged(
        &self,
        target: &RemoteTarget,
        cmd: ProcessCommand,
    ) -> Result<ProcessOutput, EngineError> {
        self.runner.run(cmd).await.map_err(|e| {
            if let EngineError::Timeout { .. } = e {
                error!("Remote operation on {} timed out", target.host);
            }
            e
        })
    }

    fn common_options(&self, target: &RemoteTarget) -> Vec<String> {
        let mut opts = vec!["-i".to_string(), target.key_path.display().to_string()];
        for opt in [
            "BatchMode=yes".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "PasswordAuthentication=no".to_string(),
            "KbdInteractiveAuthentication=no".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ] {
            opts.push("-o".to_string());
            opts.push(opt);
        }
        opts
    }

    fn classify_failure(&self, target: &RemoteTarget, output: &ProcessOutput) -> EngineError {
        let stderr = output.stderr.to_lowercase();
        if stderr.contains("permission denied")
            || stderr.contains("too many authentication failures")
            || stderr.contains("no supported authentication methods")
        {
            EngineError::AuthenticationFailed {
                host: target.host.clone(),
            }
        } else if stderr.contains("timed out") {
            EngineError::Timeout {
                operation: format!("ssh connection to {}", target.host),
                after: self.connect_timeout,
            }
        } else {
            debug!("ssh stderr from {}: {}", target.host, output.stderr.trim());
            EngineError::ConnectionFailed {
                host: target.host.clone(),
                reason: connection_failure_reason(&stderr).to_string(),
            }
        }
    }
}

/// Fixed description of a connection failure; raw client output stays in debug logs
fn connection_failure_reason(stderr: &str) -> &'static str {
    if stderr.contains("connection refused") {
        "connection refused"
    } else if stderr.contains("no route to host")
        || stderr.contains("network is unreachable")
        || stderr.contains("could not resolve hostname")
    {
        "host unreachable"
    } else if stderr.contains("host key") {
        "host key verification failed"
    } else if stderr.contains("connection closed") || stderr.contains("connection reset") {
        "connection closed by remote host"
    } else {
        "ssh client exited with status 255"
    }
}
