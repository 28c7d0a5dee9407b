//! Remote sync gateway: every read and write against the chat backend.
//!
//! [`Backend`] is the raw transport seam (HTTP in production, fakes in tests).
//! [`Gateway`] wraps it and normalizes outcomes so callers always get a value
//! or a typed failure, never a panic.

mod http;
pub mod protocol;

pub use http::{HttpBackend, DEFAULT_BASE_URL};
pub use protocol::{AppStats, GlobalStats, SystemStats};

use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;

/// Text shown as the bot reply when generation fails.
pub const OFFLINE_TEXT: &str = "ERROR: SYSTEM_OFFLINE";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
    #[error("malformed backend response: {0}")]
    Malformed(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// One network call per method. Implementations report failures as `Err`;
/// they do not retry.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, GatewayError>;

    async fn fetch_models(&self) -> Result<Vec<String>, GatewayError>;

    /// Produce the bot reply for one prompt. May take arbitrarily long.
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GatewayError>;

    async fn persist_session(&self, session: &Session) -> Result<(), GatewayError>;

    async fn delete_session(&self, id: &str) -> Result<(), GatewayError>;

    async fn fetch_telemetry(&self) -> Result<SystemStats, GatewayError>;
}

/// Outcome of a generate call. Either way there is text to show.
#[derive(Debug)]
pub enum Reply {
    Text(String),
    Offline(GatewayError),
}

impl Reply {
    /// The text to append as the bot message.
    pub fn text(&self) -> &str {
        match self {
            Reply::Text(t) => t,
            Reply::Offline(_) => OFFLINE_TEXT,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Reply::Offline(_))
    }
}

/// Normalizing wrapper around a [`Backend`]. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn Backend>,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Stored sessions; empty when the call fails or the payload is malformed.
    pub async fn sessions(&self) -> Vec<Session> {
        match self.backend.fetch_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("gateway: loading sessions failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Available models; empty when the call fails or the payload is malformed.
    pub async fn models(&self) -> Vec<String> {
        match self.backend.fetch_models().await {
            Ok(models) => models,
            Err(e) => {
                log::warn!("gateway: loading models failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn generate(&self, prompt: &str, model: &str) -> Reply {
        match self.backend.generate(prompt, model).await {
            Ok(text) => Reply::Text(text),
            Err(e) => {
                log::warn!("gateway: generate with model {:?} failed: {}", model, e);
                Reply::Offline(e)
            }
        }
    }

    pub async fn persist_session(&self, session: &Session) -> Result<(), GatewayError> {
        self.backend.persist_session(session).await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), GatewayError> {
        self.backend.delete_session(id).await
    }

    /// One telemetry reading, or None when the poll failed.
    pub async fn telemetry(&self) -> Option<SystemStats> {
        match self.backend.fetch_telemetry().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("gateway: telemetry poll failed: {}", e);
                None
            }
        }
    }
}
