use std::str::FromStr;

use forge_core::health::DEFAULT_STALE_THRESHOLD_SECS;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background tasks get to stop after the server drains (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Operator JWT configuration.
    pub jwt: JwtConfig,
    /// Dispatch engine tuning.
    pub dispatch: DispatchConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    ///
    /// # Panics
    ///
    /// Panics on malformed values so misconfiguration fails at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", 30);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
        }
    }
}

/// Which [`DispatchStore`](forge_db::store::DispatchStore) backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgreSQL via `DATABASE_URL` (default).
    Postgres,
    /// Process-local state; lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!(
                "unknown store backend '{other}' (expected 'postgres' or 'memory')"
            )),
        }
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Seconds without a heartbeat after which a node is stale.
    pub stale_threshold_secs: i64,
    pub store_backend: StoreBackend,
    pub reaper: RunReaperConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: DEFAULT_STALE_THRESHOLD_SECS,
            store_backend: StoreBackend::Postgres,
            reaper: RunReaperConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Load dispatch settings from environment variables.
    ///
    /// | Env Var                     | Default    |
    /// |-----------------------------|------------|
    /// | `NODE_STALE_THRESHOLD_SECS` | `300`      |
    /// | `STORE_BACKEND`             | `postgres` |
    /// | `RUN_REAPER_ENABLED`        | `false`    |
    /// | `RUN_REAPER_GRACE_SECS`     | `900`      |
    /// | `RUN_REAPER_INTERVAL_SECS`  | `60`       |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stale_threshold_secs: i64 =
            env_or("NODE_STALE_THRESHOLD_SECS", defaults.stale_threshold_secs);
        assert!(
            stale_threshold_secs > 0,
            "NODE_STALE_THRESHOLD_SECS must be positive"
        );

        let store_backend = env_or("STORE_BACKEND", defaults.store_backend);

        let reaper = RunReaperConfig {
            enabled: env_or("RUN_REAPER_ENABLED", defaults.reaper.enabled),
            grace_secs: env_or("RUN_REAPER_GRACE_SECS", defaults.reaper.grace_secs),
            interval_secs: env_or("RUN_REAPER_INTERVAL_SECS", defaults.reaper.interval_secs),
        };
        assert!(reaper.interval_secs > 0, "RUN_REAPER_INTERVAL_SECS must be positive");

        Self {
            stale_threshold_secs,
            store_backend,
            reaper,
        }
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_threshold_secs)
    }
}

/// Settings for the optional stale-run reaper.
#[derive(Debug, Clone)]
pub struct RunReaperConfig {
    /// Off unless explicitly enabled.
    pub enabled: bool,
    /// Seconds the owning node must be silent before its run is failed.
    pub grace_secs: i64,
    /// Seconds between sweeps.
    pub interval_secs: u64,
}

impl Default for RunReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_secs: 900,
            interval_secs: 60,
        }
    }
}

/// Read and parse an env var, falling back to `default` when unset.
///
/// # Panics
///
/// Panics if the variable is set but does not parse.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
