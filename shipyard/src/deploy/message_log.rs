//! Append-only progress log for one deployment

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    /// Raw tool output; kept for operators, never shown to the caller
    Diagnostic,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: MessageLevel,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Ordered messages for one deployment.
///
/// Entries are only ever appended. Cloning shares the same log.
#[derive(Debug, Clone)]
pub struct DeploymentMessageLog {
    deployment_id: String,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl DeploymentMessageLog {
    pub fn new(deployment_id: impl Into<String>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.append(MessageLevel::Info, text.into());
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.append(MessageLevel::Warning, text.into());
    }

    /// Record tool output under `label`; blank output is skipped
    pub fn diagnostic(&self, label: &str, output: &str) {
        let output = output.trim();
        if output.is_empty() {
            return;
        }
        self.append(MessageLevel::Diagnostic, format!("{}:\n{}", label, output));
    }

    fn append(&self, level: MessageLevel, text: String) {
        match level {
            MessageLevel::Info => info!(deployment_id = %self.deployment_id, "{}", text),
            MessageLevel::Warning => warn!(deployment_id = %self.deployment_id, "{}", text),
            MessageLevel::Diagnostic => debug!(deployment_id = %self.deployment_id, "{}", text),
        }

        let entry = LogEntry {
            level,
            timestamp: Utc::now(),
            text,
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Every entry, diagnostics included
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Caller-facing messages: everything except diagnostics
    pub fn transcript(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level != MessageLevel::Diagnostic)
            .map(|e| e.text)
            .collect()
    }
}
