//! Transport for the node protocol.
//!
//! [`DispatchClient`] is the seam the worker loop talks through;
//! [`HttpDispatchClient`] implements it over HTTP with [`reqwest`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::protocol::{
    ApiErrorBody, Completion, CompletionBody, DataEnvelope, HeartbeatAck, LogEntryBody, LogLevel,
    PollResponse,
};

#[async_trait]
pub trait DispatchClient: Send + Sync {
    async fn heartbeat(&self) -> Result<HeartbeatAck, AgentError>;

    async fn poll(&self) -> Result<PollResponse, AgentError>;

    async fn append_log(&self, run_id: i64, level: LogLevel, message: &str)
        -> Result<(), AgentError>;

    async fn complete(&self, run_id: i64, body: &CompletionBody) -> Result<Completion, AgentError>;
}

/// HTTP client for one dispatch server, authenticated with one node key.
pub struct HttpDispatchClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDispatchClient {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_client(reqwest::Client::new(), &config.api_url, &config.api_key)
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: format!("{}/api/v1/node", api_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<T, AgentError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// Decode the `{data}` envelope, or turn an error body into
    /// [`AgentError::Api`].
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AgentError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(body) => (body.code, body.error),
                Err(_) => ("UNKNOWN".to_string(), text),
            };
            return Err(AgentError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }
        Ok(response.json::<DataEnvelope<T>>().await?.data)
    }
}

#[async_trait]
impl DispatchClient for HttpDispatchClient {
    async fn heartbeat(&self) -> Result<HeartbeatAck, AgentError> {
        self.post::<(), _>("/heartbeat", None).await
    }

    async fn poll(&self) -> Result<PollResponse, AgentError> {
        self.post::<(), _>("/poll", None).await
    }

    async fn append_log(
        &self,
        run_id: i64,
        level: LogLevel,
        message: &str,
    ) -> Result<(), AgentError> {
        let body = LogEntryBody { level, message };
        let _: serde_json::Value = self.post(&format!("/runs/{run_id}/logs"), Some(&body)).await?;
        Ok(())
    }

    async fn complete(&self, run_id: i64, body: &CompletionBody) -> Result<Completion, AgentError> {
        self.post(&format!("/runs/{run_id}/complete"), Some(body))
            .await
    }
}
