//! Run log level names.
//!
//! These must match the `chk_run_logs_level` constraint in the
//! `create_dispatch_tables` migration.

use crate::error::CoreError;

pub const LOG_LEVEL_INFO: &str = "info";
pub const LOG_LEVEL_WARN: &str = "warn";
pub const LOG_LEVEL_ERROR: &str = "error";

/// All accepted log levels.
pub const LOG_LEVELS: [&str; 3] = [LOG_LEVEL_INFO, LOG_LEVEL_WARN, LOG_LEVEL_ERROR];

/// Maximum length of a single log message.
pub const MAX_LOG_MESSAGE_LEN: usize = 16 * 1024;

/// Validate a log level and message pair.
pub fn validate_log_entry(level: &str, message: &str) -> Result<(), CoreError> {
    if !LOG_LEVELS.contains(&level) {
        return Err(CoreError::Validation(format!(
            "Unknown log level \"{level}\"; expected one of info, warn, error"
        )));
    }
    if message.is_empty() {
        return Err(CoreError::Validation(
            "Log message must not be empty".to_string(),
        ));
    }
    if message.len() > MAX_LOG_MESSAGE_LEN {
        return Err(CoreError::Validation(format!(
            "Log message must not exceed {MAX_LOG_MESSAGE_LEN} bytes"
        )));
    }
    Ok(())
}
