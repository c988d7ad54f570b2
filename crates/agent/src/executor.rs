//! Task execution: the external code-generation step.
//!
//! [`TaskExecutor`] is what the worker calls with a claimed request.
//! [`CommandExecutor`] runs a configured program, streaming its stdout into
//! the run log and taking the last stdout line as the artifact URL.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use forge_core::log_levels::MAX_LOG_MESSAGE_LEN;
use forge_core::submission;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::client::DispatchClient;
use crate::error::AgentError;
use crate::protocol::{clip, LogLevel, WorkRequest};

/// Longest stderr excerpt copied into a failure message.
const MAX_STDERR_EXCERPT: usize = 2000;

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    /// Result reference, e.g. a pull-request URL.
    pub artifact_url: String,
    pub summary: Option<String>,
}

/// Progress sink bound to one run.
pub struct RunLog<'a> {
    client: &'a dyn DispatchClient,
    run_id: i64,
}

impl<'a> RunLog<'a> {
    pub fn new(client: &'a dyn DispatchClient, run_id: i64) -> Self {
        Self { client, run_id }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Append a line to the run's log, cut to the server's message limit.
    ///
    /// Fails with an `INVALID_STATE` API error once the run is terminal;
    /// executors should stop when that happens.
    pub async fn write(&self, level: LogLevel, message: &str) -> Result<(), AgentError> {
        self.client
            .append_log(self.run_id, level, clip(message, MAX_LOG_MESSAGE_LEN))
            .await
    }

    pub async fn info(&self, message: &str) -> Result<(), AgentError> {
        self.write(LogLevel::Info, message).await
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute one claimed request.
    ///
    /// `Err(AgentError::Execution)` is a task failure that the worker
    /// reports as a FAILED run; other errors are transport problems.
    async fn execute(&self, request: &WorkRequest, log: &RunLog<'_>)
        -> Result<TaskOutput, AgentError>;
}

/// Runs an external program per task.
///
/// The request is passed through `FORGE_*` environment variables. Every
/// stdout line is logged at `info`; on exit status 0 the last non-empty
/// stdout line must be the artifact URL.
#[derive(Debug)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, AgentError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AgentError::Config("Executor command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    fn command(&self, request: &WorkRequest, run_id: i64) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("FORGE_RUN_ID", run_id.to_string())
            .env("FORGE_REQUEST_ID", request.id.to_string())
            .env("FORGE_SOURCE_TASK_ID", request.source_task_id.to_string())
            .env("FORGE_TITLE", &request.title)
            .env("FORGE_INSTRUCTIONS", request.instructions.as_deref().unwrap_or(""))
            .env("FORGE_REPOSITORY_URL", &request.repository_url)
            .env("FORGE_BRANCH_NAME", &request.branch_name)
            .env("FORGE_BASE_BRANCH", request.base_branch.as_deref().unwrap_or(""))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run_to_completion(
        &self,
        request: &WorkRequest,
        log: &RunLog<'_>,
    ) -> Result<TaskOutput, AgentError> {
        let mut child = self
            .command(request, log.run_id())
            .spawn()
            .map_err(|e| AgentError::Execution(format!("Failed to start {}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Execution("Executor stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Execution("Executor stderr unavailable".into()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_line = None;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AgentError::Execution(format!("Reading executor output: {e}")))?
        {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            match log.info(&line).await {
                Ok(()) => {}
                // A terminal run means the work is no longer wanted; dropping
                // the child kills it.
                Err(e) if e.is_invalid_state() => return Err(e),
                Err(e) => tracing::warn!(
                    run_id = log.run_id(),
                    error = %e,
                    "Could not forward executor output; continuing",
                ),
            }
            last_line = Some(line);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::Execution(format!("Waiting for executor: {e}")))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(AgentError::Execution(format!(
                "Executor exited with {}: {}",
                status.code().map_or("signal".to_string(), |c| c.to_string()),
                excerpt(stderr.trim()),
            )));
        }

        artifact_from(last_line)
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(
        &self,
        request: &WorkRequest,
        log: &RunLog<'_>,
    ) -> Result<TaskOutput, AgentError> {
        tracing::info!(
            run_id = log.run_id(),
            request_id = request.id,
            program = %self.program,
            "Starting executor",
        );

        match tokio::time::timeout(self.timeout, self.run_to_completion(request, log)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Execution(format!(
                "Executor timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// The executor's last stdout line as a result the server will accept.
fn artifact_from(last_line: Option<String>) -> Result<TaskOutput, AgentError> {
    let url = last_line.ok_or_else(|| {
        AgentError::Execution("Executor succeeded but did not print an artifact URL".into())
    })?;
    submission::validate_artifact_url(&url)
        .map_err(|e| AgentError::Execution(format!("Executor printed an unusable result: {e}")))?;
    Ok(TaskOutput {
        artifact_url: url,
        summary: None,
    })
}

/// Keep the tail of long stderr output; the end usually holds the cause.
fn excerpt(text: &str) -> &str {
    if text.len() <= MAX_STDERR_EXCERPT {
        return text;
    }
    let mut start = text.len() - MAX_STDERR_EXCERPT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
