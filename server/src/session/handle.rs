use rules::CandidateMove;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{SessionCommand, SessionError};
use super::events::SessionEvent;
use super::snapshot::SessionSnapshot;

/// Cheap, cloneable handle to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(id: String, cmd_tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { id, cmd_tx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn join(
        &self,
        account_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SessionEvent>), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Join {
            account_id: account_id.into(),
            display_name: display_name.into(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))?
    }

    pub async fn make_move(
        &self,
        account_id: impl Into<String>,
        candidate: CandidateMove,
    ) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Move {
            account_id: account_id.into(),
            candidate,
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))?
    }

    pub async fn resign(&self, account_id: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Resign {
            account_id: account_id.into(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))?
    }

    pub async fn offer_draw(&self, account_id: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::OfferDraw {
            account_id: account_id.into(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))?
    }

    pub async fn accept_draw(&self, account_id: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::AcceptDraw {
            account_id: account_id.into(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))?
    }

    pub async fn leave(&self, account_id: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Leave {
            account_id: account_id.into(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))?
    }

    pub async fn get_snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::GetSnapshot { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("reply dropped".into()))
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::Internal("session actor closed".into()))
    }
}
