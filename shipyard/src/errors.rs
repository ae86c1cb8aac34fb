//! Error types for the deployment engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration error: {field} is required but was not provided")]
    MissingField { field: &'static str },

    #[error("Required tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{command} failed{}", exit_code_suffix(.exit_code))]
    ExecutionFailed {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Authentication rejected by {host}")]
    AuthenticationFailed { host: String },

    #[error("Could not connect to {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Private key file not found: {}", .path.display())]
    KeyFileMissing { path: PathBuf },

    #[error("Malformed response from {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => " (terminated without an exit code)".to_string(),
    }
}

/// Coarse error categories that drive compensation and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ToolNotFound,
    ExecutionFailed,
    Timeout,
    AuthenticationFailed,
    ConnectionFailed,
    Decode,
    Internal,
}

impl EngineError {
    /// Build an execution failure for a finished command
    pub fn execution(command: impl Into<String>, exit_code: Option<i32>) -> Self {
        EngineError::ExecutionFailed {
            command: command.into(),
            exit_code,
        }
    }

    /// Build a decode failure
    pub fn decode(context: impl Into<String>, reason: impl ToString) -> Self {
        EngineError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_)
            | EngineError::MissingField { .. }
            | EngineError::KeyFileMissing { .. } => ErrorKind::Configuration,
            EngineError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            EngineError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            EngineError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            EngineError::Decode { .. } | EngineError::Json(_) => ErrorKind::Decode,
            EngineError::Io(_)
            | EngineError::Template(_)
            | EngineError::Server(_)
            | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may reasonably try the same operation again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::ConnectionFailed
        )
    }
}
