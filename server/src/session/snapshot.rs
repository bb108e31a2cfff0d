use rules::Side;

use super::clock::TimeControl;

/// Who the session pairs: two accounts, or one account against the built-in
/// search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Paired,
    VsEngine,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paired => "paired",
            Self::VsEngine => "vs_engine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paired" => Some(Self::Paired),
            "vs_engine" => Some(Self::VsEngine),
            _ => None,
        }
    }
}

/// Session lifecycle. Transitions are one-directional:
/// Open -> Active -> (Finished | Aborted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Active,
    Finished,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "active" => Some(Self::Active),
            "finished" => Some(Self::Finished),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }
}

/// Result of a finished session. Set if and only if status is Finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    WhiteWins,
    BlackWins,
    Draw,
}

impl Outcome {
    pub fn win_for(side: Side) -> Self {
        match side {
            Side::White => Self::WhiteWins,
            Side::Black => Self::BlackWins,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WhiteWins => "white_wins",
            Self::BlackWins => "black_wins",
            Self::Draw => "draw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "white_wins" => Some(Self::WhiteWins),
            "black_wins" => Some(Self::BlackWins),
            "draw" => Some(Self::Draw),
            _ => None,
        }
    }
}

/// One occupied seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub account_id: String,
    pub display_name: String,
}

/// A single move in the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
    pub san: String,
    pub fen_after: String,
    /// Mover's remaining budget after the move, when the session is timed.
    pub clock_ms: Option<u64>,
}

/// Clock state for subscribers to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub white_remaining_ms: u64,
    pub black_remaining_ms: u64,
}

/// Complete, immutable view of session state.
/// Sent to subscribers on join and after every mutation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub outcome: Option<Outcome>,
    pub outcome_reason: Option<String>,
    pub white_seat: Option<Seat>,
    pub black_seat: Option<Seat>,
    pub fen: String,
    pub side_to_move: Side,
    pub move_count: usize,
    pub history: Vec<MoveRecord>,
    pub time_control: Option<TimeControl>,
    pub clocks: Option<ClockSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_round_trips() {
        for mode in [SessionMode::Paired, SessionMode::VsEngine] {
            assert_eq!(SessionMode::parse(mode.as_str()), Some(mode));
        }
        for status in [
            SessionStatus::Open,
            SessionStatus::Active,
            SessionStatus::Finished,
            SessionStatus::Aborted,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        for outcome in [Outcome::WhiteWins, Outcome::BlackWins, Outcome::Draw] {
            assert_eq!(Outcome::parse(outcome.as_str()), Some(outcome));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Open.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Finished.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_win_for() {
        assert_eq!(Outcome::win_for(Side::White), Outcome::WhiteWins);
        assert_eq!(Outcome::win_for(Side::Black), Outcome::BlackWins);
    }
}
