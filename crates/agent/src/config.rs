use std::time::Duration;

use crate::error::AgentError;

/// Default seconds between polls while idle.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
/// Default seconds between heartbeats while a task executes.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// Default wall-clock limit for one task.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 3600;

/// Immutable agent configuration, built once and passed into the worker loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the dispatch API, without the `/api/v1` suffix.
    pub api_url: String,
    /// This node's API key (`fgn_...`).
    pub api_key: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Program and arguments of the external code-generation command.
    pub executor_command: Vec<String>,
    pub task_timeout: Duration,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                  | Required | Default |
    /// |---------------------------|----------|---------|
    /// | `FORGE_API_URL`           | yes      | --      |
    /// | `FORGE_API_KEY`           | yes      | --      |
    /// | `FORGE_EXECUTOR_COMMAND`  | yes      | --      |
    /// | `POLL_INTERVAL_SECS`      | no       | `10`    |
    /// | `HEARTBEAT_INTERVAL_SECS` | no       | `30`    |
    /// | `TASK_TIMEOUT_SECS`       | no       | `3600`  |
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so parsing is testable without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AgentError::Config(format!("{key} is required")))
        };
        let seconds = |key: &str, default: u64| -> Result<Duration, AgentError> {
            let secs = match lookup(key) {
                Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                    AgentError::Config(format!("{key} must be a whole number of seconds"))
                })?,
                None => default,
            };
            if secs == 0 {
                return Err(AgentError::Config(format!("{key} must be positive")));
            }
            Ok(Duration::from_secs(secs))
        };

        let api_url = required("FORGE_API_URL")?.trim_end_matches('/').to_string();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(AgentError::Config(
                "FORGE_API_URL must start with http:// or https://".into(),
            ));
        }

        let api_key = required("FORGE_API_KEY")?;
        if !api_key.starts_with(forge_core::node_keys::KEY_MARKER) {
            return Err(AgentError::Config(
                "FORGE_API_KEY does not look like a node key".into(),
            ));
        }

        let executor_command: Vec<String> = required("FORGE_EXECUTOR_COMMAND")?
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Self {
            api_url,
            api_key,
            poll_interval: seconds("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            heartbeat_interval: seconds(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )?,
            executor_command,
            task_timeout: seconds("TASK_TIMEOUT_SECS", DEFAULT_TASK_TIMEOUT_SECS)?,
        })
    }
}
