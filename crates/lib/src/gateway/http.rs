//! HTTP backend client (http://127.0.0.1:8001 by default).

use super::protocol::{self, GenerateRequest, SystemStats};
use super::{Backend, GatewayError};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8001";

/// Client for the chat backend's HTTP API.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    generate_timeout: Option<Duration>,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
            generate_timeout: None,
        }
    }

    /// Bound how long `generate` waits. Without it the call waits indefinitely.
    pub fn with_generate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.generate_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/delete_chat/{id}` with the id percent-encoded as one path segment.
    fn delete_url(&self, id: &str) -> Result<reqwest::Url, GatewayError> {
        let mut url = reqwest::Url::parse(&self.url(protocol::PATH_DELETE))
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.clone()))?
            .push(id);
        Ok(url)
    }

    async fn json_body(res: reqwest::Response) -> Result<Value, GatewayError> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value, GatewayError> {
        let res = self.client.get(self.url(path)).send().await?;
        Self::json_body(res).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    /// GET /get_chats
    async fn fetch_sessions(&self) -> Result<Vec<Session>, GatewayError> {
        protocol::parse_sessions(self.get_json(protocol::PATH_SESSIONS).await?)
    }

    /// GET /models
    async fn fetch_models(&self) -> Result<Vec<String>, GatewayError> {
        protocol::parse_models(self.get_json(protocol::PATH_MODELS).await?)
    }

    /// POST /generate
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GatewayError> {
        let body = GenerateRequest {
            prompt: prompt.to_string(),
            model: model.to_string(),
        };
        let mut req = self.client.post(self.url(protocol::PATH_GENERATE)).json(&body);
        if let Some(timeout) = self.generate_timeout {
            req = req.timeout(timeout);
        }
        let res = req.send().await?;
        protocol::parse_generate(Self::json_body(res).await?)
    }

    /// POST /save_chat; the ack body is ignored.
    async fn persist_session(&self, session: &Session) -> Result<(), GatewayError> {
        let res = self
            .client
            .post(self.url(protocol::PATH_SAVE))
            .json(session)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }

    /// DELETE /delete_chat/{id}; the ack body is ignored.
    async fn delete_session(&self, id: &str) -> Result<(), GatewayError> {
        let res = self.client.delete(self.delete_url(id)?).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }

    /// GET /system_stats
    async fn fetch_telemetry(&self) -> Result<SystemStats, GatewayError> {
        protocol::parse_system_stats(self.get_json(protocol::PATH_STATS).await?)
    }
}
