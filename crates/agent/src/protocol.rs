//! Wire types for the node protocol, as seen from the node.
//!
//! Only the fields the agent acts on are declared; unknown fields are
//! ignored on decode.

use chrono::{DateTime, Utc};
use forge_core::submission::MAX_OUTCOME_TEXT_LEN;
use serde::{Deserialize, Serialize};

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// Error body returned on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatAck {
    pub node_id: i64,
    pub status: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub server_time: DateTime<Utc>,
}

/// The task half of a successful claim.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkRequest {
    pub id: i64,
    pub source_task_id: i64,
    pub title: String,
    pub instructions: Option<String>,
    pub repository_url: String,
    pub branch_name: String,
    pub base_branch: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkRun {
    pub id: i64,
    pub execution_request_id: i64,
    pub status_id: i16,
    pub artifact_url: Option<String>,
    pub error_message: Option<String>,
}

/// Result of `POST /node/poll`.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    pub available: bool,
    pub reason: Option<String>,
    pub request: Option<WorkRequest>,
    pub run: Option<WorkRun>,
}

impl PollResponse {
    /// The claimed pair, when the poll handed out work.
    pub fn into_work(self) -> Option<(WorkRequest, WorkRun)> {
        match (self.available, self.request, self.run) {
            (true, Some(request), Some(run)) => Some((request, run)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntryBody<'a> {
    pub level: LogLevel,
    pub message: &'a str,
}

/// Body of `POST /node/runs/{id}/complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionBody {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl CompletionBody {
    pub fn done(artifact_url: String, summary: Option<String>) -> Self {
        Self {
            status: "done",
            artifact_url: Some(artifact_url),
            error_message: None,
            summary,
        }
    }

    /// A failed outcome. The message is cut to what the server accepts,
    /// and an empty one is replaced so the report is never rejected.
    pub fn failed(error_message: String) -> Self {
        let error_message = match clip(error_message.trim(), MAX_OUTCOME_TEXT_LEN) {
            "" => "Task failed without an error message".to_string(),
            text => text.to_string(),
        };
        Self {
            status: "failed",
            artifact_url: None,
            error_message: Some(error_message),
            summary: None,
        }
    }
}

/// Cut `text` to at most `max` bytes without splitting a character.
pub fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Result of a completion call. `applied` is false when the run was
/// already terminal.
#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    pub run: WorkRun,
    pub applied: bool,
}
