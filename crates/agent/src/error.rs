/// Errors surfaced by the agent's transport and executor.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The dispatch server answered with a non-2xx status.
    #[error("Dispatch API error ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The task executor could not produce a result.
    #[error("Execution failed: {0}")]
    Execution(String),
}

impl AgentError {
    /// The server no longer accepts this node's key (revoked or
    /// deregistered). Retrying will not help.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AgentError::Api { status: 401, .. })
    }

    /// The run already reached a terminal state, usually because an
    /// operator canceled it.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, AgentError::Api { code, .. } if code == "INVALID_STATE")
    }

    /// The request may succeed if sent again: the connection failed or the
    /// server is overloaded or broken.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Http(_) => true,
            AgentError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The server refused the payload itself (400). Sending the same body
    /// again will fail the same way.
    pub fn is_rejected_payload(&self) -> bool {
        matches!(self, AgentError::Api { status: 400, .. })
    }
}
