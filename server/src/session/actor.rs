use std::time::{Duration, Instant};

use engine::{EngineCommand, EngineEvent};
use rules::{format_square, CandidateMove, Side};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::Instrument;

use crate::persistence::{AccountRecord, AccountRepository, GameRepository, Store};

use super::clock;
use super::commands::{SessionCommand, SessionError};
use super::events::SessionEvent;
use super::rating;
use super::snapshot::{MoveRecord, Outcome, SessionSnapshot, SessionStatus};
use super::state::SessionState;
use super::ENGINE_ACCOUNT_ID;

/// Extra slack on top of the search budget before the actor gives up on a
/// pending engine reply.
const ENGINE_GRACE: Duration = Duration::from_millis(500);

/// The main session actor loop.
/// Owns all mutable state. Processes events for this session one at a time,
/// in arrival order; sessions run fully in parallel with each other.
pub(crate) async fn run_session_actor<S: Store>(
    state: SessionState,
    store: S,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    let session_id = state.session_id.clone();
    run_session_actor_inner(state, store, cmd_rx, event_tx)
        .instrument(tracing::info_span!("session", id = %session_id))
        .await;
}

async fn run_session_actor_inner<S: Store>(
    mut state: SessionState,
    store: S,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    tracing::info!("Session actor started");

    let mut clock_interval = time::interval(time::Duration::from_millis(250));
    clock_interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        // Copied out so the deadline arm does not borrow `state`.
        let engine_deadline = state.engine_deadline;

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown) | None => {
                        tracing::info!("Session actor shutting down");
                        if let Some(engine) = state.engine.take() {
                            engine.shutdown().await;
                        }
                        break;
                    }
                    Some(cmd) => {
                        handle_command(&mut state, &store, cmd, &event_tx).await;
                        state.shutdown_engine_if_ended().await;
                    }
                }
            }

            engine_event = state.next_engine_event(), if state.engine.is_some() => {
                match engine_event {
                    Some(engine_event) => {
                        handle_engine_event(&mut state, &store, engine_event, &event_tx).await;
                        state.shutdown_engine_if_ended().await;
                    }
                    None => {
                        tracing::warn!("engine channel closed");
                        state.engine = None;
                        state.engine_thinking = false;
                        state.engine_deadline = None;
                    }
                }
            }

            _ = sleep_until_deadline(engine_deadline), if engine_deadline.is_some() => {
                // Budget missed: no move is applied and the turn stays with
                // the automated side. A later result is discarded as stale.
                state.engine_thinking = false;
                state.engine_deadline = None;
                tracing::warn!("engine missed its thinking budget");
            }

            _ = clock_interval.tick(), if state.clock_running() => {
                check_flag_fall(&mut state, &store, &event_tx).await;
                state.shutdown_engine_if_ended().await;
            }
        }
    }

    tracing::info!("Session actor exited");
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn handle_command<S: Store>(
    state: &mut SessionState,
    store: &S,
    cmd: SessionCommand,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    match cmd {
        SessionCommand::Join {
            account_id,
            display_name,
            reply,
        } => {
            match handle_join(state, store, &account_id, display_name).await {
                Ok(activated) => {
                    let snapshot = state.snapshot();
                    // Broadcast to existing members before subscribing the
                    // joiner, whose reply already carries this snapshot.
                    if activated {
                        let _ = event_tx.send(SessionEvent::State(snapshot.clone()));
                    }
                    let rx = event_tx.subscribe();
                    let _ = reply.send(Ok((snapshot, rx)));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
            maybe_trigger_engine(state).await;
        }
        SessionCommand::Move {
            account_id,
            candidate,
            reply,
        } => {
            let result = handle_move(state, store, &account_id, candidate, event_tx).await;
            let _ = reply.send(result);
            maybe_trigger_engine(state).await;
        }
        SessionCommand::Resign { account_id, reply } => {
            let _ = reply.send(handle_resign(state, store, &account_id, event_tx).await);
        }
        SessionCommand::OfferDraw { account_id, reply } => {
            let _ = reply.send(handle_offer_draw(state, &account_id, event_tx));
        }
        SessionCommand::AcceptDraw { account_id, reply } => {
            let _ = reply.send(handle_accept_draw(state, store, &account_id, event_tx).await);
        }
        SessionCommand::Leave { account_id, reply } => {
            let _ = reply.send(handle_leave(state, store, &account_id, event_tx).await);
        }
        SessionCommand::GetSnapshot { reply } => {
            let _ = reply.send(state.snapshot());
        }
        SessionCommand::Shutdown => unreachable!(),
    }
}

/// Fill the empty seat (Open -> Active, exactly once) or treat a seated
/// caller as an idempotent re-subscribe. Returns whether the session was
/// activated by this join.
async fn handle_join<S: Store>(
    state: &mut SessionState,
    store: &S,
    account_id: &str,
    display_name: String,
) -> Result<bool, SessionError> {
    if state.seat_side(account_id).is_some() {
        // Rejoin: membership refresh only, no state mutation.
        return Ok(false);
    }

    if state.status != SessionStatus::Open {
        return Err(SessionError::IllegalState(
            "seats are already filled".to_string(),
        ));
    }
    if state.black_seat.is_some() {
        return Err(SessionError::IllegalState(
            "seats are already filled".to_string(),
        ));
    }

    let checkpoint = state.checkpoint();
    state.black_seat = Some(super::snapshot::Seat {
        account_id: account_id.to_string(),
        display_name,
    });
    state.activate();
    persist_or_restore(state, store, checkpoint).await?;

    tracing::info!(account = %account_id, "second seat filled, session active");
    Ok(true)
}

async fn handle_move<S: Store>(
    state: &mut SessionState,
    store: &S,
    account_id: &str,
    candidate: CandidateMove,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> Result<SessionSnapshot, SessionError> {
    if state.status != SessionStatus::Active {
        return Err(SessionError::IllegalState(
            "session is not active".to_string(),
        ));
    }
    let side = state
        .seat_side(account_id)
        .ok_or_else(|| SessionError::Forbidden("not seated in this session".to_string()))?;
    if side != state.position.side_to_move() {
        return Err(SessionError::Forbidden("not your turn".to_string()));
    }

    // Time forfeit is checked before the rule engine sees the move: a move
    // arriving after budget exhaustion is rejected and the session ends.
    let now = Instant::now();
    let mut elapsed = None;
    if let Some(clocks) = &state.clocks {
        let e = now.duration_since(clocks.last_transition);
        if clock::flag_fallen(clocks.remaining(side), e) {
            finalize_time_forfeit(state, store, side, event_tx).await?;
            return Err(SessionError::IllegalState("time forfeited".to_string()));
        }
        elapsed = Some(e);
    }

    let applied = state
        .position
        .apply(candidate)
        .map_err(|e| SessionError::InvalidMove(e.to_string()))?;

    let checkpoint = state.checkpoint();

    let clock_ms = match (&mut state.clocks, elapsed, state.time_control) {
        (Some(clocks), Some(e), Some(control)) => {
            let transition = clock::turn_transition(clocks.remaining(side), control.increment_ms, e);
            clocks.set_remaining(side, transition.remaining_ms);
            clocks.last_transition = now;
            Some(transition.remaining_ms)
        }
        _ => None,
    };

    let record = MoveRecord {
        from: format_square(candidate.from),
        to: format_square(candidate.to),
        promotion: applied
            .mv
            .promotion
            .map(|p| rules::PieceKind::from(p).to_char_upper().to_string()),
        san: applied.san.clone(),
        fen_after: applied.position.fen(),
        clock_ms,
    };
    state.position = applied.position;
    state.history.push(record.clone());

    if let Some(flag) = applied.terminal {
        let outcome = if flag.is_decisive() {
            Outcome::win_for(side)
        } else {
            Outcome::Draw
        };
        state.finish(outcome, flag.reason());
    }

    persist_or_restore(state, store, checkpoint).await?;

    let snapshot = state.snapshot();
    let _ = event_tx.send(SessionEvent::MoveApplied {
        record,
        snapshot: snapshot.clone(),
    });

    if state.status == SessionStatus::Finished {
        settle_accounts(state, store).await;
        broadcast_ended(state, event_tx);
    }

    Ok(snapshot)
}

async fn handle_resign<S: Store>(
    state: &mut SessionState,
    store: &S,
    account_id: &str,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    if state.status != SessionStatus::Active {
        return Err(SessionError::IllegalState(
            "session is not active".to_string(),
        ));
    }
    let side = state
        .seat_side(account_id)
        .ok_or_else(|| SessionError::Forbidden("not seated in this session".to_string()))?;

    let checkpoint = state.checkpoint();
    state.finish(Outcome::win_for(side.opposite()), "resignation");
    persist_or_restore(state, store, checkpoint).await?;

    settle_accounts(state, store).await;
    broadcast_ended(state, event_tx);
    Ok(())
}

/// Draw offers mutate nothing: the opposing seat is notified and may accept
/// at any time while the session stays active.
fn handle_offer_draw(
    state: &SessionState,
    account_id: &str,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    if state.status != SessionStatus::Active {
        return Err(SessionError::IllegalState(
            "session is not active".to_string(),
        ));
    }
    let side = state
        .seat_side(account_id)
        .ok_or_else(|| SessionError::Forbidden("not seated in this session".to_string()))?;
    let Some(opponent) = state.seat(side.opposite()) else {
        return Err(SessionError::IllegalState("no opponent seated".to_string()));
    };
    let Some(seat) = state.seat(side) else {
        return Err(SessionError::Forbidden("not seated in this session".to_string()));
    };

    let _ = event_tx.send(SessionEvent::DrawOffered {
        by: side,
        by_name: seat.display_name.clone(),
        to_account: opponent.account_id.clone(),
    });
    Ok(())
}

async fn handle_accept_draw<S: Store>(
    state: &mut SessionState,
    store: &S,
    account_id: &str,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    if state.status != SessionStatus::Active {
        return Err(SessionError::IllegalState(
            "session is not active".to_string(),
        ));
    }
    if state.seat_side(account_id).is_none() {
        return Err(SessionError::Forbidden(
            "not seated in this session".to_string(),
        ));
    }

    let checkpoint = state.checkpoint();
    state.finish(Outcome::Draw, "draw agreed");
    persist_or_restore(state, store, checkpoint).await?;

    settle_accounts(state, store).await;
    broadcast_ended(state, event_tx);
    Ok(())
}

/// Leaving an active game never forfeits it (players may reconnect); the
/// creator leaving a still-open session aborts it.
async fn handle_leave<S: Store>(
    state: &mut SessionState,
    store: &S,
    account_id: &str,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    if state.status == SessionStatus::Open && state.seat_side(account_id) == Some(Side::White) {
        let checkpoint = state.checkpoint();
        state.abort("creator left");
        persist_or_restore(state, store, checkpoint).await?;
        broadcast_ended(state, event_tx);
        tracing::info!(account = %account_id, "open session aborted by creator");
    }
    Ok(())
}

/// Flag fall between moves, driven by the actor's clock tick.
async fn check_flag_fall<S: Store>(
    state: &mut SessionState,
    store: &S,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    if state.status != SessionStatus::Active {
        return;
    }
    let side = state.position.side_to_move();
    let fallen = state
        .clocks
        .as_ref()
        .is_some_and(|c| clock::flag_fallen(c.remaining(side), c.last_transition.elapsed()));
    if !fallen {
        return;
    }
    if let Err(e) = finalize_time_forfeit(state, store, side, event_tx).await {
        tracing::error!(error = %e, "failed to finalize time forfeit");
    }
}

async fn finalize_time_forfeit<S: Store>(
    state: &mut SessionState,
    store: &S,
    loser: Side,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let checkpoint = state.checkpoint();
    if let Some(clocks) = &mut state.clocks {
        clocks.set_remaining(loser, 0);
    }
    state.finish(Outcome::win_for(loser.opposite()), "time forfeit");
    persist_or_restore(state, store, checkpoint).await?;

    settle_accounts(state, store).await;
    broadcast_ended(state, event_tx);
    Ok(())
}

/// Persist the current state; on failure roll back to the checkpoint so the
/// in-memory state never runs ahead of the durable copy. The caller's event
/// is dropped and may safely be resubmitted.
async fn persist_or_restore<S: Store>(
    state: &mut SessionState,
    store: &S,
    checkpoint: super::state::Checkpoint,
) -> Result<(), SessionError> {
    match store.save_game(&state.to_record()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "persistence write failed, dropping event");
            state.restore(checkpoint);
            Err(SessionError::Internal("storage failure".to_string()))
        }
    }
}

fn broadcast_ended(state: &SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    let _ = event_tx.send(SessionEvent::Ended {
        outcome: state.outcome,
        reason: state.outcome_reason.clone().unwrap_or_default(),
        snapshot: state.snapshot(),
    });
}

/// Ask the engine for a move when it is the automated side's turn. The
/// search runs outside the actor; its result re-enters as an ordinary event.
async fn maybe_trigger_engine(state: &mut SessionState) {
    if state.engine_thinking || !state.is_engine_turn() {
        return;
    }
    let Some(engine) = &state.engine else {
        return;
    };

    let command = EngineCommand::Search {
        fen: state.position.fen(),
        budget: state.engine_budget,
    };
    match engine.send_command(command).await {
        Ok(()) => {
            state.engine_thinking = true;
            state.engine_deadline =
                Some(tokio::time::Instant::now() + state.engine_budget + ENGINE_GRACE);
        }
        Err(e) => tracing::error!(error = %e, "failed to trigger engine search"),
    }
}

async fn handle_engine_event<S: Store>(
    state: &mut SessionState,
    store: &S,
    event: EngineEvent,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    match event {
        EngineEvent::SearchResult(result) => {
            if !state.engine_thinking {
                tracing::debug!("discarding stale engine result");
                return;
            }
            state.engine_thinking = false;
            state.engine_deadline = None;

            if !state.is_engine_turn() {
                tracing::debug!("discarding engine result, not the engine's turn");
                return;
            }

            match result {
                Some(candidate) => {
                    if let Err(e) =
                        handle_move(state, store, ENGINE_ACCOUNT_ID, candidate, event_tx).await
                    {
                        tracing::error!(error = %e, "engine move rejected");
                    }
                }
                None => {
                    tracing::warn!("engine found no move, turn stays with the automated side");
                }
            }
        }
        EngineEvent::Error(e) => {
            state.engine_thinking = false;
            state.engine_deadline = None;
            tracing::error!(error = %e, "engine failure");
        }
    }
}

async fn settle_accounts<S: Store>(state: &SessionState, store: &S) {
    let Some(outcome) = state.outcome else {
        return;
    };

    let human = |seat: &Option<super::snapshot::Seat>| {
        seat.as_ref()
            .filter(|s| s.account_id != ENGINE_ACCOUNT_ID)
            .cloned()
    };
    let white_rec = match human(&state.white_seat) {
        Some(seat) => load_account(store, &seat.account_id).await,
        None => None,
    };
    let black_rec = match human(&state.black_seat) {
        Some(seat) => load_account(store, &seat.account_id).await,
        None => None,
    };

    // Ratings only move when two humans played each other.
    let (white_rating, black_rating) = match (&white_rec, &black_rec) {
        (Some(w), Some(b)) => rating::adjusted(w.rating, b.rating, outcome),
        _ => (
            white_rec.as_ref().map(|r| r.rating).unwrap_or_default(),
            black_rec.as_ref().map(|r| r.rating).unwrap_or_default(),
        ),
    };

    for (record, side, new_rating) in [
        (white_rec, Side::White, white_rating),
        (black_rec, Side::Black, black_rating),
    ] {
        let Some(record) = record else { continue };
        let games_played = record.games_played + 1;
        let won = outcome == Outcome::win_for(side);
        let games_won = record.games_won + u32::from(won);
        if let Err(e) = store
            .update_stats(&record.account_id, new_rating, games_played, games_won)
            .await
        {
            tracing::error!(account = %record.account_id, error = %e, "failed to update account stats");
        }
    }
}

async fn load_account<S: Store>(store: &S, id: &str) -> Option<AccountRecord> {
    match store.find_account(id).await {
        Ok(found) => found,
        Err(e) => {
            tracing::error!(account = %id, error = %e, "failed to load account");
            None
        }
    }
}
