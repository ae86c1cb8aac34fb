//! Out-of-process command execution
//!
//! Every external tool (terraform, kubectl, docker, git, ssh, sftp, aws) is
//! invoked through a [`CommandRunner`], so the orchestration logic can be
//! driven against a [`ScriptedRunner`] in tests.

pub mod runner;
pub mod scripted;

pub use runner::{CommandRunner, ProcessCommand, ProcessOutput, TokioCommandRunner};
pub use scripted::{RecordedCall, ScriptedResponse, ScriptedRunner};
