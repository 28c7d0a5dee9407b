//! In-memory backend for unit tests.

use crate::gateway::{AppStats, Backend, GatewayError, GlobalStats, SystemStats};
use crate::session::Session;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Parks a call until released; `entered` fires when the call starts waiting.
#[derive(Default)]
pub struct Hold {
    pub entered: Notify,
    pub release: Notify,
}

impl Hold {
    async fn wait(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
pub struct FakeBackend {
    offline: bool,
    stored: Mutex<Vec<Session>>,
    models: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<Result<String, GatewayError>>>,
    generate_calls: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    telemetry_calls: AtomicUsize,
    generate_hold: Mutex<Option<Arc<Hold>>>,
    telemetry_hold: Mutex<Option<Arc<Hold>>>,
    persist_hold: Mutex<Option<Arc<Hold>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails like an unreachable host.
    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            offline: true,
            ..Self::default()
        })
    }

    pub fn set_sessions(&self, sessions: Vec<Session>) {
        *self.stored.lock().unwrap() = sessions;
    }

    pub fn set_models(&self, models: &[&str]) {
        *self.models.lock().unwrap() = models.iter().map(|m| m.to_string()).collect();
    }

    pub fn push_reply(&self, reply: Result<String, GatewayError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn hold_generate(&self) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        *self.generate_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn hold_telemetry(&self) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        *self.telemetry_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    /// Parks only the next `persist_session` call.
    pub fn hold_next_persist(&self) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        *self.persist_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn stored(&self) -> Vec<Session> {
        self.stored.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn generate_calls(&self) -> Vec<(String, String)> {
        self.generate_calls.lock().unwrap().clone()
    }

    pub fn telemetry_calls(&self) -> usize {
        self.telemetry_calls.load(Ordering::SeqCst)
    }

    fn refused() -> GatewayError {
        GatewayError::Api("connection refused".to_string())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, GatewayError> {
        if self.offline {
            return Err(Self::refused());
        }
        let mut sessions = self.stored();
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sessions)
    }

    async fn fetch_models(&self) -> Result<Vec<String>, GatewayError> {
        if self.offline {
            return Err(Self::refused());
        }
        Ok(self.models.lock().unwrap().clone())
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GatewayError> {
        self.generate_calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), model.to_string()));
        let hold = self.generate_hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.wait().await;
        }
        if self.offline {
            return Err(Self::refused());
        }
        let queued = self.replies.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(format!("echo: {}", prompt)))
    }

    async fn persist_session(&self, session: &Session) -> Result<(), GatewayError> {
        let hold = self.persist_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.wait().await;
        }
        if self.offline {
            return Err(Self::refused());
        }
        let mut stored = self.stored.lock().unwrap();
        stored.retain(|s| s.id != session.id);
        stored.push(session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), GatewayError> {
        if self.offline {
            return Err(Self::refused());
        }
        self.stored.lock().unwrap().retain(|s| s.id != id);
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn fetch_telemetry(&self) -> Result<SystemStats, GatewayError> {
        let n = self.telemetry_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let hold = self.telemetry_hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.wait().await;
        }
        if self.offline {
            return Err(Self::refused());
        }
        Ok(SystemStats {
            global: GlobalStats {
                cpu: n as f64,
                ram_pct: 50.0,
                ram_gb: "8.0/16.0 GB".to_string(),
            },
            app: AppStats {
                cpu: 1.5,
                ram_gb: "0.25 GB".to_string(),
            },
        })
    }
}
