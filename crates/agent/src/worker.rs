//! The node's main loop: heartbeat, poll, execute, log, complete.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::DispatchClient;
use crate::error::AgentError;
use crate::executor::{RunLog, TaskExecutor};
use crate::protocol::{Completion, CompletionBody, LogLevel, WorkRequest, WorkRun};

/// Completion attempts per cycle before the outcome is held for the next one.
const COMPLETE_ATTEMPTS: u32 = 3;

/// What one pass through the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// No work was handed out; carries the server's reason.
    Idle(String),
    /// A run was executed and its outcome reported.
    Completed {
        run_id: i64,
        status: &'static str,
        applied: bool,
    },
    /// The run became terminal server-side (e.g. operator cancel) while
    /// executing; nothing was reported.
    Abandoned { run_id: i64 },
}

/// Pull-based worker over a [`DispatchClient`] and a [`TaskExecutor`].
///
/// Once a run is claimed the worker always reports an outcome for it. The
/// server keeps the node busy until it does, so an outcome that could not
/// be delivered is held and resent before the next poll.
pub struct Worker<C, E> {
    client: C,
    executor: E,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    retry_delay: Duration,
    unreported: Mutex<Option<(i64, CompletionBody)>>,
}

impl<C: DispatchClient, E: TaskExecutor> Worker<C, E> {
    pub fn new(
        client: C,
        executor: E,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            client,
            executor,
            poll_interval,
            heartbeat_interval,
            retry_delay: Duration::from_secs(2),
            unreported: Mutex::new(None),
        }
    }

    /// Base delay between completion attempts (multiplied by the attempt).
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Loop until `cancel` fires or the server rejects the node's key.
    ///
    /// Transport errors are logged and retried after the poll interval.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AgentError> {
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Worker loop started"
        );

        loop {
            let pause = match self.run_once().await {
                Ok(Cycle::Completed { .. }) | Ok(Cycle::Abandoned { .. }) => Duration::ZERO,
                Ok(Cycle::Idle(reason)) => {
                    tracing::debug!(reason = %reason, "No work available");
                    self.poll_interval
                }
                Err(e) if e.is_unauthorized() => {
                    tracing::error!(error = %e, "Node key rejected; stopping worker");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Worker cycle failed; retrying");
                    self.poll_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Worker loop stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// One heartbeat + poll, and if work was claimed, execute it to a
    /// reported outcome. A held outcome from an earlier cycle is delivered
    /// instead of polling.
    pub async fn run_once(&self) -> Result<Cycle, AgentError> {
        self.client.heartbeat().await?;

        let held = self.unreported.lock().await.take();
        if let Some((run_id, body)) = held {
            tracing::info!(run_id, "Resending undelivered run outcome");
            return self.report(run_id, body).await;
        }

        let poll = self.client.poll().await?;
        let reason = poll.reason.clone().unwrap_or_else(|| "no_work".to_string());
        let Some((request, run)) = poll.into_work() else {
            return Ok(Cycle::Idle(reason));
        };

        tracing::info!(
            run_id = run.id,
            request_id = request.id,
            title = %request.title,
            "Claimed execution request"
        );

        tokio::select! {
            cycle = self.execute(&request, &run) => cycle,
            err = self.keep_alive() => Err(err),
        }
    }

    /// Heartbeat periodically while a task runs so the node is not flagged
    /// stale. Returns only when a heartbeat fails with a rejected key.
    async fn keep_alive(&self) -> AgentError {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        // The claiming heartbeat was just sent.
        interval.tick().await;
        loop {
            interval.tick().await;
            match self.client.heartbeat().await {
                Ok(_) => {}
                Err(e) if e.is_unauthorized() => return e,
                Err(e) => tracing::warn!(error = %e, "Heartbeat failed during execution"),
            }
        }
    }

    async fn execute(&self, request: &WorkRequest, run: &WorkRun) -> Result<Cycle, AgentError> {
        let log = RunLog::new(&self.client, run.id);

        let body = match self.executor.execute(request, &log).await {
            Ok(output) => CompletionBody::done(output.artifact_url, output.summary),
            Err(e) if e.is_invalid_state() => {
                tracing::warn!(run_id = run.id, "Run was closed server-side; abandoning");
                return Ok(Cycle::Abandoned { run_id: run.id });
            }
            Err(e) => {
                let message = match e {
                    AgentError::Execution(message) => message,
                    other => other.to_string(),
                };
                tracing::warn!(run_id = run.id, error = %message, "Task failed");
                // The completion below carries the error anyway.
                if let Err(e) = log.write(LogLevel::Error, &message).await {
                    tracing::debug!(run_id = run.id, error = %e, "Could not log task failure");
                }
                CompletionBody::failed(message)
            }
        };

        self.report(run.id, body).await
    }

    /// Deliver a run outcome.
    ///
    /// A `done` outcome the server rejects as invalid is reported as a
    /// failure instead, so the node is released either way. An outcome
    /// that fails for transport reasons is held for the next cycle.
    async fn report(&self, run_id: i64, body: CompletionBody) -> Result<Cycle, AgentError> {
        let body = match self.complete_with_retry(run_id, &body).await {
            Ok(completion) => return Ok(completed(run_id, &body, &completion)),
            Err(e) if e.is_rejected_payload() && body.status != "failed" => {
                tracing::warn!(run_id, error = %e, "Server rejected the task result");
                CompletionBody::failed(format!("Server rejected the task result: {e}"))
            }
            Err(e) => return Err(self.hold(run_id, body, e).await),
        };

        match self.complete_with_retry(run_id, &body).await {
            Ok(completion) => Ok(completed(run_id, &body, &completion)),
            Err(e) => Err(self.hold(run_id, body, e).await),
        }
    }

    async fn complete_with_retry(
        &self,
        run_id: i64,
        body: &CompletionBody,
    ) -> Result<Completion, AgentError> {
        let mut attempt = 1;
        loop {
            match self.client.complete(run_id, body).await {
                Err(e) if e.is_transient() && attempt < COMPLETE_ATTEMPTS => {
                    tracing::warn!(run_id, attempt, error = %e, "Completion failed; retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Keep a transiently undelivered outcome for the next cycle.
    async fn hold(&self, run_id: i64, body: CompletionBody, error: AgentError) -> AgentError {
        if error.is_transient() {
            tracing::warn!(run_id, error = %error, "Run outcome not delivered; holding it");
            *self.unreported.lock().await = Some((run_id, body));
        }
        error
    }
}

fn completed(run_id: i64, body: &CompletionBody, completion: &Completion) -> Cycle {
    if completion.applied {
        tracing::info!(run_id, status = body.status, "Run completed");
    } else {
        tracing::info!(run_id, "Run was already terminal; outcome not applied");
    }
    Cycle::Completed {
        run_id,
        status: body.status,
        applied: completion.applied,
    }
}
