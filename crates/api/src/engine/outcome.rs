//! Completion payloads reported by nodes and their validation.

use forge_core::error::CoreError;
use forge_core::submission;
use forge_db::models::run::{Run, RunOutcome};
use forge_db::models::status::RunStatus;
use serde::{Deserialize, Serialize};

/// Body of `POST /node/runs/{id}/complete`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRunRequest {
    /// `done`, `failed`, or `canceled` (case-insensitive).
    pub status: String,
    pub artifact_url: Option<String>,
    pub error_message: Option<String>,
    pub summary: Option<String>,
}

impl CompleteRunRequest {
    /// Validate the payload into a terminal [`RunOutcome`].
    ///
    /// `done` requires an artifact URL, `failed` requires an error message,
    /// and neither outcome may carry the other's field.
    pub fn into_outcome(self) -> Result<RunOutcome, CoreError> {
        let status = RunStatus::from_name(&self.status.trim().to_ascii_lowercase())
            .filter(|status| status.is_terminal())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown completion status '{}'; expected done, failed, or canceled",
                    self.status
                ))
            })?;

        let summary = non_blank(self.summary);
        if let Some(text) = &summary {
            submission::validate_outcome_text("summary", text)?;
        }
        let artifact_url = non_blank(self.artifact_url);
        let error_message = non_blank(self.error_message);

        match status {
            RunStatus::Done => {
                if error_message.is_some() {
                    return Err(CoreError::Validation(
                        "A done run must not carry an error message".to_string(),
                    ));
                }
                let artifact_url = artifact_url.ok_or_else(|| {
                    CoreError::Validation("A done run requires an artifact_url".to_string())
                })?;
                submission::validate_artifact_url(&artifact_url)?;
                Ok(RunOutcome::Done {
                    artifact_url,
                    summary,
                })
            }
            RunStatus::Failed => {
                if artifact_url.is_some() {
                    return Err(CoreError::Validation(
                        "A failed run must not carry an artifact_url".to_string(),
                    ));
                }
                let error_message = error_message.ok_or_else(|| {
                    CoreError::Validation("A failed run requires an error_message".to_string())
                })?;
                submission::validate_outcome_text("error_message", &error_message)?;
                Ok(RunOutcome::Failed {
                    error_message,
                    summary,
                })
            }
            _ => {
                if artifact_url.is_some() || error_message.is_some() {
                    return Err(CoreError::Validation(
                        "A canceled run carries neither artifact_url nor error_message"
                            .to_string(),
                    ));
                }
                Ok(RunOutcome::Canceled { summary })
            }
        }
    }
}

/// Treat empty or whitespace-only strings as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Result of a terminal transition request.
///
/// `applied` is `false` when the run was already terminal; `run` then holds
/// the stored, unchanged result.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub run: Run,
    pub applied: bool,
}
