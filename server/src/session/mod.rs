//! The live session engine.
//!
//! One actor task per session owns all mutable state; its mpsc command queue
//! totally orders the session's events while different sessions proceed in
//! parallel. Membership in a session's broadcast group is holding a receiver
//! handed out by the actor's Join path, so membership changes share the same
//! serialization domain as every other session event.

pub mod actor;
pub mod clock;
pub mod commands;
pub mod events;
pub mod handle;
pub mod rating;
pub mod snapshot;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use engine::SearchEngine;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::persistence::{GameRepository, Store};

use actor::run_session_actor;
pub use clock::TimeControl;
pub use commands::SessionError;
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use snapshot::{
    MoveRecord, Outcome, Seat, SessionMode, SessionSnapshot, SessionStatus,
};
use state::SessionState;

/// Reserved identity occupying the automated opponent's seat. Never present
/// in the account store.
pub const ENGINE_ACCOUNT_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const ENGINE_DISPLAY_NAME: &str = "Engine";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Thinking budget handed to the automated opponent per move.
    pub engine_budget: Duration,
    /// How long a terminal session stays resident before eviction from the
    /// in-memory map. The persisted copy is never deleted.
    pub retention: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            engine_budget: Duration::from_secs(2),
            retention: Duration::from_secs(300),
        }
    }
}

/// Manages all live sessions. Spawns an actor task per session.
pub struct SessionManager<S> {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    store: S,
    settings: SessionSettings,
}

impl<S: Store> SessionManager<S> {
    pub fn new(store: S, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            store,
            settings,
        }
    }

    /// Create a session with the creator seated as white. In VsEngine mode
    /// the engine takes the black seat immediately and the session starts
    /// active.
    pub async fn create_session(
        &self,
        creator: Seat,
        mode: SessionMode,
        time_control: Option<TimeControl>,
    ) -> Result<SessionSnapshot, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let mut state = SessionState::new(
            session_id.clone(),
            mode,
            creator,
            time_control,
            self.settings.engine_budget,
        );

        if mode == SessionMode::VsEngine {
            state.black_seat = Some(engine_seat());
            state.activate();
            state.engine = Some(SearchEngine::spawn(session_id.clone()));
        }

        self.store.save_game(&state.to_record()).await.map_err(|e| {
            tracing::error!(error = %e, "failed to persist new session");
            SessionError::Internal("storage failure".to_string())
        })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(100);
        let snapshot = state.snapshot();

        self.spawn_retention_watcher(session_id.clone(), event_tx.subscribe());

        let store = self.store.clone();
        let event_tx_clone = event_tx.clone();
        tokio::spawn(async move {
            run_session_actor(state, store, cmd_rx, event_tx_clone).await;
        });

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), SessionHandle::new(session_id, cmd_tx));

        tracing::info!(session = %snapshot.session_id, mode = mode.as_str(), "session created");
        Ok(snapshot)
    }

    pub async fn get_handle(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Evict the session once it reaches a terminal status and the retention
    /// window elapses.
    fn spawn_retention_watcher(
        &self,
        session_id: String,
        mut event_rx: broadcast::Receiver<SessionEvent>,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let retention = self.settings.retention;
        tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(SessionEvent::Ended { .. }) => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            tokio::time::sleep(retention).await;
            let handle = sessions.write().await.remove(&session_id);
            if let Some(handle) = handle {
                handle.shutdown().await;
                tracing::info!(session = %session_id, "terminal session evicted");
            }
        });
    }
}

pub(crate) fn engine_seat() -> Seat {
    Seat {
        account_id: ENGINE_ACCOUNT_ID.to_string(),
        display_name: ENGINE_DISPLAY_NAME.to_string(),
    }
}
