use std::time::Duration;

use engine::{EngineEvent, SearchEngine};
use rules::{Position, Side};

use crate::persistence::{now_timestamp, GameRecord, StoredMove};

use super::clock::{ClockPair, TimeControl};
use super::snapshot::{
    ClockSnapshot, MoveRecord, Outcome, Seat, SessionMode, SessionSnapshot, SessionStatus,
};

/// Internal mutable state, owned entirely by the session actor. No locks.
pub(crate) struct SessionState {
    pub session_id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub outcome: Option<Outcome>,
    pub outcome_reason: Option<String>,
    pub white_seat: Option<Seat>,
    pub black_seat: Option<Seat>,
    pub position: Position,
    pub history: Vec<MoveRecord>,
    pub time_control: Option<TimeControl>,
    pub clocks: Option<ClockPair>,
    pub engine: Option<SearchEngine>,
    pub engine_thinking: bool,
    pub engine_deadline: Option<tokio::time::Instant>,
    pub engine_budget: Duration,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

/// Saved fields for rolling back a mutation whose persistence write failed.
/// In-memory state must never run ahead of the durable copy.
pub(crate) struct Checkpoint {
    status: SessionStatus,
    outcome: Option<Outcome>,
    outcome_reason: Option<String>,
    white_seat: Option<Seat>,
    black_seat: Option<Seat>,
    position: Position,
    history_len: usize,
    clocks: Option<ClockPair>,
    started_at: Option<u64>,
    finished_at: Option<u64>,
}

impl SessionState {
    pub fn new(
        session_id: String,
        mode: SessionMode,
        creator: Seat,
        time_control: Option<TimeControl>,
        engine_budget: Duration,
    ) -> Self {
        Self {
            session_id,
            mode,
            status: SessionStatus::Open,
            outcome: None,
            outcome_reason: None,
            white_seat: Some(creator),
            black_seat: None,
            position: Position::startpos(),
            history: Vec::new(),
            time_control,
            clocks: None,
            engine: None,
            engine_thinking: false,
            engine_deadline: None,
            engine_budget,
            created_at: now_timestamp(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn seat(&self, side: Side) -> Option<&Seat> {
        match side {
            Side::White => self.white_seat.as_ref(),
            Side::Black => self.black_seat.as_ref(),
        }
    }

    /// Which side the account occupies, if seated.
    pub fn seat_side(&self, account_id: &str) -> Option<Side> {
        if self.white_seat.as_ref().is_some_and(|s| s.account_id == account_id) {
            return Some(Side::White);
        }
        if self.black_seat.as_ref().is_some_and(|s| s.account_id == account_id) {
            return Some(Side::Black);
        }
        None
    }

    /// Both seats filled: start the game. Called exactly once per session.
    pub fn activate(&mut self) {
        self.status = SessionStatus::Active;
        self.started_at = Some(now_timestamp());
        self.clocks = self.time_control.map(ClockPair::new);
    }

    pub fn finish(&mut self, outcome: Outcome, reason: &str) {
        self.status = SessionStatus::Finished;
        self.outcome = Some(outcome);
        self.outcome_reason = Some(reason.to_string());
        self.finished_at = Some(now_timestamp());
    }

    pub fn abort(&mut self, reason: &str) {
        self.status = SessionStatus::Aborted;
        self.outcome = None;
        self.outcome_reason = Some(reason.to_string());
        self.finished_at = Some(now_timestamp());
    }

    /// The automated opponent always holds the black seat.
    pub fn is_engine_turn(&self) -> bool {
        self.mode == SessionMode::VsEngine
            && self.status == SessionStatus::Active
            && self.position.side_to_move() == Side::Black
    }

    pub fn clock_running(&self) -> bool {
        self.status == SessionStatus::Active && self.clocks.is_some()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            status: self.status,
            outcome: self.outcome,
            outcome_reason: self.outcome_reason.clone(),
            white_seat: self.white_seat.clone(),
            black_seat: self.black_seat.clone(),
            position: self.position.clone(),
            history_len: self.history.len(),
            clocks: self.clocks.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.status = checkpoint.status;
        self.outcome = checkpoint.outcome;
        self.outcome_reason = checkpoint.outcome_reason;
        self.white_seat = checkpoint.white_seat;
        self.black_seat = checkpoint.black_seat;
        self.position = checkpoint.position;
        self.history.truncate(checkpoint.history_len);
        self.clocks = checkpoint.clocks;
        self.started_at = checkpoint.started_at;
        self.finished_at = checkpoint.finished_at;
    }

    /// Build a full snapshot of the current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let clocks = self.clocks.as_ref().map(|c| {
            let mut reading = ClockSnapshot {
                white_remaining_ms: c.white_ms,
                black_remaining_ms: c.black_ms,
            };
            // Charge the in-flight elapsed time to the side on move so
            // readings are monotonically non-increasing between transitions.
            if self.status == SessionStatus::Active {
                let elapsed = c.last_transition.elapsed().as_millis() as u64;
                match self.position.side_to_move() {
                    Side::White => {
                        reading.white_remaining_ms = c.white_ms.saturating_sub(elapsed);
                    }
                    Side::Black => {
                        reading.black_remaining_ms = c.black_ms.saturating_sub(elapsed);
                    }
                }
            }
            reading
        });

        SessionSnapshot {
            session_id: self.session_id.clone(),
            mode: self.mode,
            status: self.status,
            outcome: self.outcome,
            outcome_reason: self.outcome_reason.clone(),
            white_seat: self.white_seat.clone(),
            black_seat: self.black_seat.clone(),
            fen: self.position.fen(),
            side_to_move: self.position.side_to_move(),
            move_count: self.history.len(),
            history: self.history.clone(),
            time_control: self.time_control,
            clocks,
        }
    }

    /// Durable copy of the current state.
    pub fn to_record(&self) -> GameRecord {
        GameRecord {
            session_id: self.session_id.clone(),
            mode: self.mode.as_str().to_string(),
            status: self.status.as_str().to_string(),
            outcome: self.outcome.map(|o| o.as_str().to_string()),
            outcome_reason: self.outcome_reason.clone(),
            white_account_id: self.white_seat.as_ref().map(|s| s.account_id.clone()),
            white_name: self.white_seat.as_ref().map(|s| s.display_name.clone()),
            black_account_id: self.black_seat.as_ref().map(|s| s.account_id.clone()),
            black_name: self.black_seat.as_ref().map(|s| s.display_name.clone()),
            fen: self.position.fen(),
            side_to_move: self.position.side_to_move().as_str().to_string(),
            move_count: self.history.len() as u32,
            initial_ms: self.time_control.map(|c| c.initial_ms),
            increment_ms: self.time_control.map(|c| c.increment_ms),
            white_remaining_ms: self.clocks.as_ref().map(|c| c.white_ms),
            black_remaining_ms: self.clocks.as_ref().map(|c| c.black_ms),
            moves: self
                .history
                .iter()
                .map(|m| StoredMove {
                    from: m.from.clone(),
                    to: m.to.clone(),
                    promotion: m.promotion.clone(),
                    san: m.san.clone(),
                    fen_after: m.fen_after.clone(),
                    clock_ms: m.clock_ms,
                })
                .collect(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    /// Try to receive the next engine event.
    pub async fn next_engine_event(&mut self) -> Option<EngineEvent> {
        match self.engine.as_mut() {
            Some(engine) => engine.recv_event().await,
            None => std::future::pending().await,
        }
    }

    pub async fn shutdown_engine_if_ended(&mut self) {
        if self.status.is_terminal() {
            if let Some(engine) = self.engine.take() {
                engine.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(id: &str, name: &str) -> Seat {
        Seat {
            account_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn test_state() -> SessionState {
        SessionState::new(
            "test".to_string(),
            SessionMode::Paired,
            seat("acc_w", "alice"),
            Some(TimeControl {
                initial_ms: 60_000,
                increment_ms: 1_000,
            }),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_new_session_is_open_with_creator_seated() {
        let state = test_state();
        assert_eq!(state.status, SessionStatus::Open);
        assert_eq!(state.seat_side("acc_w"), Some(Side::White));
        assert_eq!(state.seat_side("acc_b"), None);
        assert!(state.clocks.is_none());
    }

    #[test]
    fn test_activate_initializes_clocks() {
        let mut state = test_state();
        state.black_seat = Some(seat("acc_b", "bob"));
        state.activate();
        assert_eq!(state.status, SessionStatus::Active);
        let clocks = state.clocks.as_ref().unwrap();
        assert_eq!(clocks.white_ms, 60_000);
        assert_eq!(clocks.black_ms, 60_000);
        assert!(state.started_at.is_some());
    }

    #[test]
    fn test_checkpoint_restore_round_trip() {
        let mut state = test_state();
        let checkpoint = state.checkpoint();

        state.black_seat = Some(seat("acc_b", "bob"));
        state.activate();
        state.finish(Outcome::Draw, "draw agreed");
        state.history.push(MoveRecord {
            from: "e2".into(),
            to: "e4".into(),
            promotion: None,
            san: "e4".into(),
            fen_after: "x".into(),
            clock_ms: None,
        });

        state.restore(checkpoint);
        assert_eq!(state.status, SessionStatus::Open);
        assert!(state.black_seat.is_none());
        assert!(state.outcome.is_none());
        assert!(state.history.is_empty());
        assert!(state.clocks.is_none());
    }

    #[test]
    fn test_record_reflects_state() {
        let mut state = test_state();
        state.black_seat = Some(seat("acc_b", "bob"));
        state.activate();
        let record = state.to_record();
        assert_eq!(record.status, "active");
        assert_eq!(record.mode, "paired");
        assert_eq!(record.white_account_id.as_deref(), Some("acc_w"));
        assert_eq!(record.black_name.as_deref(), Some("bob"));
        assert_eq!(record.initial_ms, Some(60_000));
        assert_eq!(record.white_remaining_ms, Some(60_000));
        assert_eq!(record.side_to_move, "white");
    }

    #[test]
    fn test_snapshot_charges_elapsed_to_side_on_move() {
        let mut state = test_state();
        state.black_seat = Some(seat("acc_b", "bob"));
        state.activate();
        std::thread::sleep(Duration::from_millis(30));
        let snap = state.snapshot();
        let clocks = snap.clocks.unwrap();
        assert!(clocks.white_remaining_ms < 60_000);
        assert_eq!(clocks.black_remaining_ms, 60_000);
    }
}
