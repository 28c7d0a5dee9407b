//! Standalone persistence: the whole session collection as one JSON file.
//!
//! Read once at startup and rewritten after every mutation when the client
//! runs without remote session storage.

use crate::gateway::protocol;
use crate::session::Session;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Fixed key the collection is stored under (`<dir>/chat_sessions.json`).
pub const STORAGE_KEY: &str = "chat_sessions";

#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{}.json", STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored collection. Missing, unreadable, or malformed files yield
    /// an empty collection.
    pub fn load(&self) -> Vec<Session> {
        let s = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no local sessions at {}", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                log::warn!("reading local sessions from {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        let parsed = serde_json::from_str::<serde_json::Value>(&s)
            .map_err(|e| e.to_string())
            .and_then(|v| protocol::parse_sessions(v).map_err(|e| e.to_string()));
        match parsed {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("ignoring malformed local sessions at {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Write the full collection, creating the directory if needed.
    /// The file is replaced by rename, so a crash mid-write leaves the previous
    /// collection intact.
    pub fn save(&self, sessions: &[Session]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating storage directory {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(sessions).context("serializing sessions")?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, s).with_context(|| format!("writing sessions to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
