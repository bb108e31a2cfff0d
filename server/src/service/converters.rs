//! Domain model -> proto conversions and proto -> domain parsing.

use tempo_proto as proto;
use tonic::Status;

use rules::Side;

use crate::persistence::{AccountRecord, GameRecord};
use crate::session::{
    MoveRecord, Outcome, Seat, SessionMode, SessionSnapshot, SessionStatus, TimeControl,
};

pub fn side_to_proto(side: Side) -> proto::Side {
    match side {
        Side::White => proto::Side::White,
        Side::Black => proto::Side::Black,
    }
}

pub fn status_to_proto(status: SessionStatus) -> proto::SessionStatus {
    match status {
        SessionStatus::Open => proto::SessionStatus::Open,
        SessionStatus::Active => proto::SessionStatus::Active,
        SessionStatus::Finished => proto::SessionStatus::Finished,
        SessionStatus::Aborted => proto::SessionStatus::Aborted,
    }
}

pub fn outcome_to_proto(outcome: Option<Outcome>) -> proto::Outcome {
    match outcome {
        None => proto::Outcome::Unspecified,
        Some(Outcome::WhiteWins) => proto::Outcome::WhiteWins,
        Some(Outcome::BlackWins) => proto::Outcome::BlackWins,
        Some(Outcome::Draw) => proto::Outcome::Draw,
    }
}

pub fn mode_to_proto(mode: SessionMode) -> proto::SessionMode {
    match mode {
        SessionMode::Paired => proto::SessionMode::Paired,
        SessionMode::VsEngine => proto::SessionMode::VsEngine,
    }
}

fn seat_to_proto(seat: &Seat) -> proto::Seat {
    proto::Seat {
        account_id: seat.account_id.clone(),
        display_name: seat.display_name.clone(),
    }
}

pub fn record_to_proto(record: &MoveRecord) -> proto::MoveRecord {
    proto::MoveRecord {
        from: record.from.clone(),
        to: record.to.clone(),
        promotion: record.promotion.clone(),
        san: record.san.clone(),
        fen_after: record.fen_after.clone(),
        clock_ms: record.clock_ms,
    }
}

pub fn snapshot_to_proto(snapshot: &SessionSnapshot) -> proto::SessionSnapshot {
    proto::SessionSnapshot {
        session_id: snapshot.session_id.clone(),
        mode: mode_to_proto(snapshot.mode) as i32,
        status: status_to_proto(snapshot.status) as i32,
        outcome: outcome_to_proto(snapshot.outcome) as i32,
        outcome_reason: snapshot.outcome_reason.clone(),
        white_seat: snapshot.white_seat.as_ref().map(seat_to_proto),
        black_seat: snapshot.black_seat.as_ref().map(seat_to_proto),
        fen: snapshot.fen.clone(),
        side_to_move: side_to_proto(snapshot.side_to_move) as i32,
        history: snapshot.history.iter().map(record_to_proto).collect(),
        time_control: snapshot.time_control.map(|c| proto::TimeControl {
            initial_ms: c.initial_ms,
            increment_ms: c.increment_ms,
        }),
        clocks: snapshot.clocks.as_ref().map(|c| proto::ClockReading {
            white_remaining_ms: c.white_remaining_ms,
            black_remaining_ms: c.black_remaining_ms,
        }),
    }
}

pub fn account_to_proto(account: &AccountRecord) -> proto::AccountSummary {
    proto::AccountSummary {
        account_id: account.account_id.clone(),
        display_name: account.display_name.clone(),
        rating: account.rating,
        games_played: account.games_played,
        games_won: account.games_won,
    }
}

/// Snapshot view built from a durable game row, for the read-only listing
/// endpoints. Unknown stored values map to the unspecified enum values.
pub fn game_record_to_proto(record: &GameRecord) -> proto::SessionSnapshot {
    let seat = |id: &Option<String>, name: &Option<String>| match (id, name) {
        (Some(id), Some(name)) => Some(proto::Seat {
            account_id: id.clone(),
            display_name: name.clone(),
        }),
        _ => None,
    };

    proto::SessionSnapshot {
        session_id: record.session_id.clone(),
        mode: SessionMode::parse(&record.mode)
            .map(mode_to_proto)
            .unwrap_or(proto::SessionMode::Unspecified) as i32,
        status: SessionStatus::parse(&record.status)
            .map(status_to_proto)
            .unwrap_or(proto::SessionStatus::Unspecified) as i32,
        outcome: outcome_to_proto(record.outcome.as_deref().and_then(Outcome::parse)) as i32,
        outcome_reason: record.outcome_reason.clone(),
        white_seat: seat(&record.white_account_id, &record.white_name),
        black_seat: seat(&record.black_account_id, &record.black_name),
        fen: record.fen.clone(),
        side_to_move: Side::parse(&record.side_to_move)
            .map(side_to_proto)
            .unwrap_or(proto::Side::Unspecified) as i32,
        history: record
            .moves
            .iter()
            .map(|m| proto::MoveRecord {
                from: m.from.clone(),
                to: m.to.clone(),
                promotion: m.promotion.clone(),
                san: m.san.clone(),
                fen_after: m.fen_after.clone(),
                clock_ms: m.clock_ms,
            })
            .collect(),
        time_control: record.initial_ms.map(|initial_ms| proto::TimeControl {
            initial_ms,
            increment_ms: record.increment_ms.unwrap_or(0),
        }),
        clocks: match (record.white_remaining_ms, record.black_remaining_ms) {
            (Some(white_remaining_ms), Some(black_remaining_ms)) => Some(proto::ClockReading {
                white_remaining_ms,
                black_remaining_ms,
            }),
            _ => None,
        },
    }
}

pub fn parse_mode(value: i32) -> Result<SessionMode, Status> {
    match proto::SessionMode::try_from(value) {
        Ok(proto::SessionMode::Paired) => Ok(SessionMode::Paired),
        Ok(proto::SessionMode::VsEngine) => Ok(SessionMode::VsEngine),
        _ => Err(Status::invalid_argument("unknown session mode")),
    }
}

pub fn parse_time_control(
    time_control: Option<proto::TimeControl>,
) -> Result<Option<TimeControl>, Status> {
    match time_control {
        None => Ok(None),
        Some(tc) if tc.initial_ms == 0 => Err(Status::invalid_argument(
            "time control initial budget must be positive",
        )),
        Some(tc) => Ok(Some(TimeControl {
            initial_ms: tc.initial_ms,
            increment_ms: tc.increment_ms,
        })),
    }
}
