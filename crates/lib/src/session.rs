//! Conversation sessions and the store that owns them.
//!
//! The store is the single writer of the session collection and the active
//! selection. Everything else reads snapshots or goes through the dispatch
//! pipeline.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Number of characters of the first user message used as the session title.
pub const TITLE_CHARS: usize = 20;

/// Who wrote a message. Wire values are `"user"` and `"bot"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// A single message in a session. Messages are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            text: text.into(),
        }
    }
}

/// A session: id, title, and ordered message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// New empty session with a fresh id.
    pub fn new() -> Self {
        Self {
            id: next_session_id(),
            title: String::new(),
            messages: Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Milliseconds since the epoch as a decimal string, bumped so ids never repeat
/// within the process even when the clock has not advanced.
pub fn next_session_id() -> SessionId {
    let now = chrono::Utc::now().timestamp_millis();
    let prev = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1).to_string()
}

/// Ordered sessions (most recently created first) plus the active selection.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<Session>,
    active: Option<SessionId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the collection with a loaded snapshot. Order is kept; a repeated id
    /// keeps its first occurrence. A selection that no longer resolves is cleared.
    pub fn replace_all(&mut self, sessions: Vec<Session>) {
        let mut kept: Vec<Session> = Vec::with_capacity(sessions.len());
        for session in sessions {
            if kept.iter().any(|s| s.id == session.id) {
                log::warn!("dropping duplicate session id {}", session.id);
                continue;
            }
            kept.push(session);
        }
        self.sessions = kept;
        if let Some(id) = self.active.take() {
            if self.get(&id).is_some() {
                self.active = Some(id);
            }
        }
    }

    /// Create an empty session at the front and make it active; returns its id.
    pub fn create(&mut self) -> SessionId {
        let mut session = Session::new();
        while self.get(&session.id).is_some() {
            session.id = next_session_id();
        }
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.active = Some(id.clone());
        id
    }

    /// Set the active session. An id that is not in the collection deselects.
    pub fn select_active(&mut self, id: Option<&str>) {
        self.active = id
            .filter(|id| self.get(id).is_some())
            .map(str::to_string);
    }

    /// Remove a session; clears the selection if it pointed at it.
    pub fn delete(&mut self, id: &str) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.id == id)?;
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        Some(self.sessions.remove(idx))
    }

    /// Set the title from the leading characters of `text`, only while the title is empty.
    /// Returns true when the title was set.
    pub fn rename_on_first_message(&mut self, id: &str, text: &str) -> bool {
        match self.get_mut(id) {
            Some(session) if session.title.is_empty() => {
                session.title = text.chars().take(TITLE_CHARS).collect();
                !session.title.is_empty()
            }
            _ => false,
        }
    }

    /// Append a message to the session.
    pub fn append_message(&mut self, id: &str, message: Message) -> Result<(), SessionError> {
        let session = self
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.messages.push(message);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|id| self.get(id))
    }
}
