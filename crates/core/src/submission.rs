//! Validation for execution request submission and run outcomes.

use crate::error::CoreError;

/// Lowest accepted request priority.
pub const MIN_PRIORITY: i32 = -1000;

/// Highest accepted request priority.
pub const MAX_PRIORITY: i32 = 1000;

/// Maximum length of a request title.
const MAX_TITLE_LEN: usize = 200;

/// Maximum length of a repository locator or artifact URL.
const MAX_URL_LEN: usize = 2048;

/// Maximum length of a branch name.
const MAX_BRANCH_LEN: usize = 200;

/// Maximum length of a run summary or error message.
pub const MAX_OUTCOME_TEXT_LEN: usize = 8 * 1024;

/// Validate a request title.
pub fn validate_title(title: &str) -> Result<(), CoreError> {
    if title.trim().is_empty() {
        return Err(CoreError::Validation("Title must not be empty".to_string()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(CoreError::Validation(format!(
            "Title must not exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a target repository locator.
///
/// Accepts `https://`, `http://`, `ssh://` URLs and scp-style
/// `git@host:owner/repo.git` locators.
pub fn validate_repository_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "Repository URL must not exceed {MAX_URL_LEN} characters"
        )));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(CoreError::Validation(
            "Repository URL must not contain whitespace".to_string(),
        ));
    }
    let has_scheme = ["https://", "http://", "ssh://"]
        .iter()
        .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()));
    let is_scp_style = url
        .strip_prefix("git@")
        .and_then(|rest| rest.split_once(':'))
        .is_some_and(|(host, path)| !host.is_empty() && !path.is_empty());
    if !has_scheme && !is_scp_style {
        return Err(CoreError::Validation(format!(
            "Unsupported repository locator \"{url}\""
        )));
    }
    Ok(())
}

/// Validate a branch name against the subset of git ref rules that matter
/// for branches created by workers.
pub fn validate_branch_name(branch: &str) -> Result<(), CoreError> {
    if branch.is_empty() {
        return Err(CoreError::Validation(
            "Branch name must not be empty".to_string(),
        ));
    }
    if branch.len() > MAX_BRANCH_LEN {
        return Err(CoreError::Validation(format!(
            "Branch name must not exceed {MAX_BRANCH_LEN} characters"
        )));
    }
    let bad_char = branch
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if bad_char
        || branch.starts_with('/')
        || branch.starts_with('-')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch.ends_with('.')
        || branch.contains("..")
        || branch.contains("//")
        || branch.contains("@{")
    {
        return Err(CoreError::Validation(format!(
            "\"{branch}\" is not a valid branch name"
        )));
    }
    Ok(())
}

/// Validate a request priority.
pub fn validate_priority(priority: i32) -> Result<(), CoreError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(CoreError::Validation(format!(
            "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        )));
    }
    Ok(())
}

/// Validate the artifact reference reported by a successful run.
pub fn validate_artifact_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "Artifact URL must not exceed {MAX_URL_LEN} characters"
        )));
    }
    let ok = ["https://", "http://"]
        .iter()
        .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()));
    if !ok || url.chars().any(char::is_whitespace) {
        return Err(CoreError::Validation(format!(
            "Artifact reference \"{url}\" must be an http(s) URL"
        )));
    }
    Ok(())
}

/// Validate free text attached to a run outcome (summary or error message).
pub fn validate_outcome_text(field: &str, text: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if text.len() > MAX_OUTCOME_TEXT_LEN {
        return Err(CoreError::Validation(format!(
            "{field} must not exceed {MAX_OUTCOME_TEXT_LEN} bytes"
        )));
    }
    Ok(())
}
