//! Outbound HTTP seam of the callback manager.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::CallbackError;
use crate::config::CallbackConfig;
use crate::constants::callback::CONTENT_TYPE_JSON;

/// Whatever the server answered, including error statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait CallbackClient: Send + Sync + 'static {
    /// POSTs a JSON body. `Err` only when no response was received.
    async fn post(&self, url: &str, body: &[u8]) -> Result<CallbackResponse, CallbackError>;
}

/// `reqwest` client with the configured timeout and user agent.
#[derive(Debug, Clone)]
pub struct ReqwestCallbackClient {
    client: reqwest::Client,
}

impl ReqwestCallbackClient {
    pub fn new(config: &CallbackConfig) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| CallbackError::transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackClient for ReqwestCallbackClient {
    async fn post(&self, url: &str, body: &[u8]) -> Result<CallbackResponse, CallbackError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| CallbackError::transport(e.to_string()))?;

        let status = response.status().as_u16();
        // An unreadable body still carries a valid status.
        let body = response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();

        debug!(url = %url, status, "callback response received");
        Ok(CallbackResponse { status, body })
    }
}
