use rules::CandidateMove;
use tokio::sync::{broadcast, oneshot};

use super::events::SessionEvent;
use super::snapshot::SessionSnapshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("not allowed: {0}")]
    Forbidden(String),
    #[error("invalid in the current state: {0}")]
    IllegalState(String),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Commands sent to the session actor. Each embeds a oneshot for the reply.
/// All commands for one session are processed strictly in arrival order.
pub enum SessionCommand {
    /// Take the empty seat (Open sessions) or re-subscribe (seated callers).
    /// The reply carries the current snapshot plus the broadcast receiver
    /// that constitutes room membership.
    Join {
        account_id: String,
        display_name: String,
        reply: oneshot::Sender<
            Result<(SessionSnapshot, broadcast::Receiver<SessionEvent>), SessionError>,
        >,
    },
    Move {
        account_id: String,
        candidate: CandidateMove,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    Resign {
        account_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    OfferDraw {
        account_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    AcceptDraw {
        account_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Leaving never forfeits an active game; the creator leaving a
    /// still-open session aborts it.
    Leave {
        account_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    GetSnapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}
