use rules::Side;

use super::snapshot::{MoveRecord, Outcome, SessionSnapshot};

/// Events broadcast from the session actor to all subscribers.
///
/// Delivery is fire-and-forget; the actor never waits for receivers.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum SessionEvent {
    /// Full state snapshot after a non-move mutation (join, activation).
    State(SessionSnapshot),
    /// An accepted move together with the resulting state.
    MoveApplied {
        record: MoveRecord,
        snapshot: SessionSnapshot,
    },
    /// Terminal transition. `outcome` is `None` for aborted sessions.
    Ended {
        outcome: Option<Outcome>,
        reason: String,
        snapshot: SessionSnapshot,
    },
    /// Draw offer for the opposing seat. The gateway forwards this only to
    /// connections authenticated as `to_account`.
    DrawOffered {
        by: Side,
        by_name: String,
        to_account: String,
    },
}
