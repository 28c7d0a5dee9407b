//! Message dispatch pipeline and the controller that owns all chat state.
//!
//! A turn moves through `Idle -> Composing -> Sending -> AwaitingResponse ->
//! Settling -> Idle`. The user message is appended before the backend call is
//! issued; the bot message is appended after it resolves. Only one turn may be
//! outstanding for the whole client; a send while one is in flight is a no-op.
//! The only suspension point is the generate call.

use crate::config::{self, Config, StorageMode};
use crate::gateway::{Gateway, HttpBackend, Reply};
use crate::models::ModelRegistry;
use crate::session::{Message, Session, SessionId, SessionStore};
use crate::storage::LocalStorage;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::{broadcast, mpsc};

const EVENT_CAPACITY: usize = 64;

/// Pipeline state for the current (or next) turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Composing,
    Sending,
    AwaitingResponse,
    Settling,
}

/// Outcome of background sync work, published to [`ChatController::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Persisted { session_id: SessionId },
    PersistFailed { session_id: SessionId, error: String },
    Deleted { session_id: SessionId },
    DeleteFailed { session_id: SessionId, error: String },
    GenerateFailed { session_id: SessionId, error: String },
    LocalSaveFailed { error: String },
}

/// Where sessions are loaded from and written to.
#[derive(Debug, Clone)]
pub enum SessionSync {
    /// Load from the backend; persist each settled turn and delete remotely.
    Remote,
    /// Standalone: one local snapshot, rewritten after every mutation.
    Local(LocalStorage),
}

/// What a completed `send_message` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub session_id: SessionId,
    /// Bot text (the offline sentinel when generation failed).
    pub reply: String,
    pub offline: bool,
    /// False when the session was deleted while the reply was pending.
    pub delivered: bool,
}

/// Remote write queued for the sync worker.
#[derive(Debug)]
enum SyncJob {
    Persist(Session),
    Delete(SessionId),
}

struct PendingTurn {
    session_id: SessionId,
    prompt: String,
    model: String,
}

struct ChatState {
    store: SessionStore,
    models: ModelRegistry,
    input: String,
    phase: TurnPhase,
}

impl ChatState {
    fn new() -> Self {
        Self {
            store: SessionStore::new(),
            models: ModelRegistry::default(),
            input: String::new(),
            phase: TurnPhase::Idle,
        }
    }

    fn is_loading(&self) -> bool {
        matches!(
            self.phase,
            TurnPhase::Sending | TurnPhase::AwaitingResponse | TurnPhase::Settling
        )
    }

    fn idle_phase(&self) -> TurnPhase {
        if self.input.trim().is_empty() {
            TurnPhase::Idle
        } else {
            TurnPhase::Composing
        }
    }

    /// Guard, resolve the target session, append the user message, and enter `Sending`.
    fn begin_turn(&mut self, prompt: &str) -> Option<PendingTurn> {
        if prompt.trim().is_empty() || self.is_loading() {
            return None;
        }
        let session_id = match self.store.active_id().map(str::to_string) {
            Some(id) => id,
            None => self.store.create(),
        };
        let first = self
            .store
            .get(&session_id)
            .map_or(true, |s| s.messages.is_empty());
        if let Err(e) = self.store.append_message(&session_id, Message::user(prompt)) {
            log::warn!("dispatch: {}", e);
            return None;
        }
        if first {
            self.store.rename_on_first_message(&session_id, prompt);
        }
        self.input.clear();
        self.phase = TurnPhase::Sending;
        Some(PendingTurn {
            session_id,
            prompt: prompt.to_string(),
            model: self.models.selected().to_string(),
        })
    }

    /// Append the bot reply to the turn's session, looked up again by id.
    /// Returns the updated session, or None when it no longer exists.
    fn settle_turn(&mut self, turn: &PendingTurn, text: &str) -> Option<Session> {
        self.phase = TurnPhase::Settling;
        match self.store.append_message(&turn.session_id, Message::bot(text)) {
            Ok(()) => self.store.get(&turn.session_id).cloned(),
            Err(e) => {
                log::info!("dispatch: dropping reply, {}", e);
                None
            }
        }
    }

    fn finish_turn(&mut self) {
        self.phase = self.idle_phase();
    }
}

/// Clears the loading flag when the turn ends, including when the turn future is dropped.
struct LoadingGuard {
    state: Arc<Mutex<ChatState>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        lock(&self.state).finish_turn();
    }
}

/// Owns the session store, model registry, compose buffer, and turn state.
///
/// All mutation goes through this type. Reads return snapshots.
pub struct ChatController {
    state: Arc<Mutex<ChatState>>,
    gateway: Gateway,
    sync: SessionSync,
    events: broadcast::Sender<SyncEvent>,
    /// Remote writes run one at a time in the order they were queued.
    jobs: OnceLock<mpsc::UnboundedSender<SyncJob>>,
}

impl ChatController {
    pub fn new(gateway: Gateway, sync: SessionSync) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ChatState::new())),
            gateway,
            sync,
            events,
            jobs: OnceLock::new(),
        }
    }

    /// Controller talking to the configured backend, with remote or local session storage.
    pub fn from_config(config: &Config, config_path: &Path) -> Self {
        let backend = HttpBackend::new(Some(config::resolve_backend_url(config)))
            .with_generate_timeout(config.backend.generate_timeout());
        let sync = match config.storage.mode {
            StorageMode::Remote => SessionSync::Remote,
            StorageMode::Local => SessionSync::Local(LocalStorage::new(
                &config::resolve_storage_dir(config, config_path),
            )),
        };
        Self::new(Gateway::new(Arc::new(backend)), sync)
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        lock(&self.state)
    }

    /// Receive persistence, deletion, and generation failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Replace the collection with the stored snapshot. Failures leave it empty.
    /// Returns the number of sessions loaded.
    pub async fn load_all(&self) -> usize {
        let sessions = match &self.sync {
            SessionSync::Remote => self.gateway.sessions().await,
            SessionSync::Local(storage) => storage.load(),
        };
        let mut state = self.state();
        state.store.replace_all(sessions);
        log::info!("loaded {} sessions", state.store.sessions().len());
        state.store.sessions().len()
    }

    /// Fetch the model list; the first model becomes selected. Returns the count.
    pub async fn load_models(&self) -> usize {
        let models = self.gateway.models().await;
        let mut state = self.state();
        state.models.replace(models);
        state.models.models().len()
    }

    /// New empty session at the front, made active.
    pub fn create_session(&self) -> SessionId {
        let id = self.state().store.create();
        self.save_local();
        id
    }

    /// Open a session, or pass None to start a new conversation on the next send.
    /// Unknown ids deselect.
    pub fn select_active(&self, id: Option<&str>) {
        self.state().store.select_active(id);
    }

    /// Remove a session locally right away, then delete it from storage.
    /// The remote delete runs in the background and never restores the session.
    /// Must be called from within a tokio runtime in remote mode.
    pub fn delete_session(&self, id: &str) -> bool {
        if self.state().store.delete(id).is_none() {
            return false;
        }
        match &self.sync {
            SessionSync::Local(_) => self.save_local(),
            SessionSync::Remote => self.enqueue(SyncJob::Delete(id.to_string())),
        }
        true
    }

    /// Select a model from the registry. Unknown names are rejected.
    pub fn select_model(&self, name: &str) -> bool {
        self.state().models.select(name)
    }

    /// Replace the compose buffer.
    pub fn set_input(&self, text: impl Into<String>) {
        let mut state = self.state();
        state.input = text.into();
        if !state.is_loading() {
            state.phase = state.idle_phase();
        }
    }

    pub fn input(&self) -> String {
        self.state().input.clone()
    }

    /// Send the compose buffer.
    pub async fn submit(&self) -> Option<TurnOutcome> {
        let prompt = self.input();
        self.send_message(&prompt).await
    }

    /// Run one turn. Returns None (and changes nothing) for a blank prompt or
    /// while another turn is outstanding.
    pub async fn send_message(&self, prompt: &str) -> Option<TurnOutcome> {
        let turn = self.state().begin_turn(prompt)?;
        let _loading = LoadingGuard {
            state: self.state.clone(),
        };
        self.save_local();
        log::debug!(
            "dispatch: turn for session {} with model {:?}",
            turn.session_id,
            turn.model
        );

        self.state().phase = TurnPhase::AwaitingResponse;
        let reply = self.gateway.generate(&turn.prompt, &turn.model).await;
        if let Reply::Offline(e) = &reply {
            self.emit(SyncEvent::GenerateFailed {
                session_id: turn.session_id.clone(),
                error: e.to_string(),
            });
        }

        let settled = self.state().settle_turn(&turn, reply.text());
        let delivered = settled.is_some();
        if let Some(session) = settled {
            match &self.sync {
                SessionSync::Remote => self.enqueue(SyncJob::Persist(session)),
                SessionSync::Local(_) => self.save_local(),
            }
        }
        Some(TurnOutcome {
            session_id: turn.session_id,
            reply: reply.text().to_string(),
            offline: reply.is_offline(),
            delivered,
        })
    }

    /// Fire-and-forget remote write; the outcome is logged and published, never retried.
    /// The worker is started on first use, so this needs a tokio runtime.
    fn enqueue(&self, job: SyncJob) {
        let jobs = self.jobs.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_sync_worker(self.gateway.clone(), self.events.clone(), rx));
            tx
        });
        if let Err(e) = jobs.send(job) {
            log::warn!("dispatch: sync worker gone, dropping {:?}", e.0);
        }
    }

    fn save_local(&self) {
        let SessionSync::Local(storage) = &self.sync else {
            return;
        };
        let sessions = self.state().store.sessions().to_vec();
        if let Err(e) = storage.save(&sessions) {
            log::warn!("dispatch: saving local sessions failed: {:#}", e);
            self.emit(SyncEvent::LocalSaveFailed {
                error: format!("{:#}", e),
            });
        }
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.state().store.sessions().to_vec()
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.state().store.get(id).cloned()
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.state().store.active_id().map(str::to_string)
    }

    pub fn active_session(&self) -> Option<Session> {
        self.state().store.active().cloned()
    }

    /// True while a turn is outstanding.
    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn phase(&self) -> TurnPhase {
        self.state().phase
    }

    pub fn models(&self) -> Vec<String> {
        self.state().models.models().to_vec()
    }

    pub fn selected_model(&self) -> String {
        self.state().models.selected().to_string()
    }
}

/// Applies remote writes in queue order, so an older snapshot never lands
/// after a newer one and a save never revives a deleted session.
/// Exits when the controller (the only sender) is dropped.
async fn run_sync_worker(
    gateway: Gateway,
    events: broadcast::Sender<SyncEvent>,
    mut jobs: mpsc::UnboundedReceiver<SyncJob>,
) {
    while let Some(job) = jobs.recv().await {
        let event = match job {
            SyncJob::Persist(session) => match gateway.persist_session(&session).await {
                Ok(()) => {
                    log::debug!("dispatch: persisted session {}", session.id);
                    SyncEvent::Persisted {
                        session_id: session.id,
                    }
                }
                Err(e) => {
                    log::warn!("dispatch: persisting session {} failed: {}", session.id, e);
                    SyncEvent::PersistFailed {
                        session_id: session.id,
                        error: e.to_string(),
                    }
                }
            },
            SyncJob::Delete(session_id) => match gateway.delete_session(&session_id).await {
                Ok(()) => SyncEvent::Deleted { session_id },
                Err(e) => {
                    log::warn!("dispatch: deleting session {} failed: {}", session_id, e);
                    SyncEvent::DeleteFailed {
                        session_id,
                        error: e.to_string(),
                    }
                }
            },
        };
        let _ = events.send(event);
    }
    log::debug!("dispatch: sync worker stopped");
}

fn lock(state: &Mutex<ChatState>) -> MutexGuard<'_, ChatState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
