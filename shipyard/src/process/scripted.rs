//! Scripted command runner for exercising orchestration without real tools

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::process::runner::{CommandRunner, ProcessCommand, ProcessOutput};

/// Canned reaction to a matched command
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Output(ProcessOutput),
    ToolNotFound,
    Timeout,
    /// Another response, returned once the delay has passed
    Delayed(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        ScriptedResponse::Output(ProcessOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })
    }

    /// Hold this response back for `delay`, as a long-running tool would
    pub fn after(self, delay: Duration) -> Self {
        ScriptedResponse::Delayed(delay, Box::new(self))
    }
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub env_keys: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl RecordedCall {
    /// Whether every token appears among the arguments
    pub fn has_args(&self, tokens: &[&str]) -> bool {
        tokens.iter().all(|t| self.args.iter().any(|a| a == t))
    }
}

struct Expectation {
    program: String,
    tokens: Vec<String>,
    responses: VecDeque<ScriptedResponse>,
}

impl Expectation {
    fn matches(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self
                .tokens
                .iter()
                .all(|t| command.args.iter().any(|a| a == t))
    }

    /// Queued responses are consumed in order; the last one repeats
    fn next_response(&mut self) -> ScriptedResponse {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or(ScriptedResponse::ok(""))
        } else {
            self.responses
                .front()
                .cloned()
                .unwrap_or(ScriptedResponse::ok(""))
        }
    }
}

/// Replays canned responses keyed by program and argument tokens.
///
/// Expectations are checked in registration order. Commands nothing
/// matches get the fallback response, a silent success unless changed.
#[derive(Clone)]
pub struct ScriptedRunner {
    expectations: Arc<Mutex<Vec<Expectation>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    fallback: Arc<Mutex<ScriptedResponse>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            fallback: Arc::new(Mutex::new(ScriptedResponse::ok(""))),
        }
    }

    /// Respond to `program` invocations containing all `tokens`
    pub fn on(&self, program: &str, tokens: &[&str], response: ScriptedResponse) -> &Self {
        self.on_sequence(program, tokens, vec![response])
    }

    /// Like [`ScriptedRunner::on`] with successive responses
    pub fn on_sequence(
        &self,
        program: &str,
        tokens: &[&str],
        responses: Vec<ScriptedResponse>,
    ) -> &Self {
        self.lock_expectations().push(Expectation {
            program: program.to_string(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            responses: responses.into(),
        });
        self
    }

    /// Response for commands no expectation matches
    pub fn fallback(&self, response: ScriptedResponse) -> &Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = response;
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of recorded calls to `program` containing all `tokens`
    pub fn count(&self, program: &str, tokens: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program == program && c.has_args(tokens))
            .count()
    }

    fn lock_expectations(&self) -> std::sync::MutexGuard<'_, Vec<Expectation>> {
        self.expectations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, EngineError> {
        if let Ok(mut calls) = self.calls.lock() {
            let mut env_keys: Vec<String> = command.env.keys().cloned().collect();
            env_keys.sort();
            calls.push(RecordedCall {
                program: command.program.clone(),
                args: command.args.clone(),
                env_keys,
                working_dir: command.working_dir.clone(),
                stdin: command.stdin.clone(),
            });
        }

        let mut response = {
            let mut expectations = self.lock_expectations();
            match expectations.iter_mut().find(|e| e.matches(&command)) {
                Some(expectation) => expectation.next_response(),
                None => self
                    .fallback
                    .lock()
                    .map(|f| f.clone())
                    .unwrap_or(ScriptedResponse::ok("")),
            }
        };

        loop {
            match response {
                ScriptedResponse::Delayed(delay, next) => {
                    tokio::time::sleep(delay).await;
                    response = *next;
                }
                ScriptedResponse::Output(output) => return Ok(output),
                ScriptedResponse::ToolNotFound => {
                    return Err(EngineError::ToolNotFound {
                        tool: command.program,
                    })
                }
                ScriptedResponse::Timeout => {
                    return Err(EngineError::Timeout {
                        operation: command.display(),
                        after: command.timeout.unwrap_or(Duration::ZERO),
                    })
                }
            }
        }
    }
}
