//! The per-connection event loop behind the bidirectional Play stream.
//!
//! Each connection owns its own state here: a verified identity and at most
//! one session subscription. There is no process-wide connection registry.
//! Dropping the stream drops the broadcast receiver, which removes the
//! connection's room membership.

use std::sync::Arc;

use tempo_proto::{client_event, server_event, ClientEvent, ServerEvent};
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

use rules::CandidateMove;

use crate::auth::Identity;
use crate::persistence::Store;
use crate::session::{SessionError, SessionEvent, SessionManager, SessionSnapshot};

use super::converters::{outcome_to_proto, record_to_proto, side_to_proto, snapshot_to_proto};

struct Subscription {
    session_id: String,
    rx: broadcast::Receiver<SessionEvent>,
}

pub(crate) fn connection_stream<S, In>(
    identity: Identity,
    manager: Arc<SessionManager<S>>,
    mut inbound: In,
) -> impl Stream<Item = Result<ServerEvent, Status>> + Send
where
    S: Store,
    In: Stream<Item = Result<ClientEvent, Status>> + Send + Unpin + 'static,
{
    async_stream::stream! {
        tracing::info!(account = %identity.account_id, "play connection established");
        let mut subscription: Option<Subscription> = None;

        loop {
            let outputs;
            let mut done = false;

            tokio::select! {
                inbound_event = inbound.next() => {
                    outputs = match inbound_event {
                        None => {
                            done = true;
                            Vec::new()
                        }
                        Some(Err(status)) => {
                            tracing::debug!(error = %status, "play stream transport error");
                            done = true;
                            Vec::new()
                        }
                        Some(Ok(event)) => {
                            process_event(&identity, &manager, event, &mut subscription).await
                        }
                    };
                }
                session_event = next_session_event(&mut subscription) => {
                    outputs = match session_event {
                        Ok(event) => outbound_event(event, &identity).into_iter().collect(),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "play subscriber lagged");
                            Vec::new()
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            subscription = None;
                            Vec::new()
                        }
                    };
                }
            }

            for event in outputs {
                yield Ok(event);
            }
            if done {
                break;
            }
        }

        tracing::info!(account = %identity.account_id, "play connection closed");
    }
}

async fn next_session_event(
    subscription: &mut Option<Subscription>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match subscription {
        Some(sub) => sub.rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn process_event<S: Store>(
    identity: &Identity,
    manager: &SessionManager<S>,
    event: ClientEvent,
    subscription: &mut Option<Subscription>,
) -> Vec<ServerEvent> {
    let Some(event) = event.event else {
        return vec![error_notice("invalid_event", "empty client event".to_string())];
    };

    match event {
        client_event::Event::Join(join) => {
            let handle = match manager.get_handle(&join.session_id).await {
                Ok(handle) => handle,
                Err(e) => return vec![session_error_notice(&e)],
            };
            match handle
                .join(identity.account_id.clone(), identity.display_name.clone())
                .await
            {
                Ok((snapshot, rx)) => {
                    // A new subscription replaces any previous one.
                    *subscription = Some(Subscription {
                        session_id: join.session_id,
                        rx,
                    });
                    vec![state_event(&snapshot)]
                }
                Err(e) => vec![session_error_notice(&e)],
            }
        }
        client_event::Event::MakeMove(mv) => {
            let candidate = match CandidateMove::parse(&mv.from, &mv.to, mv.promotion.as_deref()) {
                Ok(candidate) => candidate,
                Err(e) => return vec![error_notice("invalid_move", e.to_string())],
            };
            let handle = match manager.get_handle(&mv.session_id).await {
                Ok(handle) => handle,
                Err(e) => return vec![session_error_notice(&e)],
            };
            match handle.make_move(identity.account_id.clone(), candidate).await {
                // The accepted move reaches this connection through the
                // broadcast, like every other subscriber.
                Ok(_) => Vec::new(),
                Err(e) => vec![session_error_notice(&e)],
            }
        }
        client_event::Event::Resign(req) => {
            seat_command(manager, &req.session_id, identity, SeatCommand::Resign).await
        }
        client_event::Event::OfferDraw(req) => {
            seat_command(manager, &req.session_id, identity, SeatCommand::OfferDraw).await
        }
        client_event::Event::AcceptDraw(req) => {
            seat_command(manager, &req.session_id, identity, SeatCommand::AcceptDraw).await
        }
        client_event::Event::Leave(req) => {
            if subscription
                .as_ref()
                .is_some_and(|s| s.session_id == req.session_id)
            {
                *subscription = None;
            }
            seat_command(manager, &req.session_id, identity, SeatCommand::Leave).await
        }
    }
}

enum SeatCommand {
    Resign,
    OfferDraw,
    AcceptDraw,
    Leave,
}

async fn seat_command<S: Store>(
    manager: &SessionManager<S>,
    session_id: &str,
    identity: &Identity,
    command: SeatCommand,
) -> Vec<ServerEvent> {
    let handle = match manager.get_handle(session_id).await {
        Ok(handle) => handle,
        Err(e) => return vec![session_error_notice(&e)],
    };
    let account_id = identity.account_id.clone();
    let result = match command {
        SeatCommand::Resign => handle.resign(account_id).await,
        SeatCommand::OfferDraw => handle.offer_draw(account_id).await,
        SeatCommand::AcceptDraw => handle.accept_draw(account_id).await,
        SeatCommand::Leave => handle.leave(account_id).await,
    };
    match result {
        Ok(()) => Vec::new(),
        Err(e) => vec![session_error_notice(&e)],
    }
}

/// Convert a broadcast event for this connection. Draw offers are private:
/// only connections authenticated as the targeted account see them.
fn outbound_event(event: SessionEvent, identity: &Identity) -> Option<ServerEvent> {
    match event {
        SessionEvent::State(snapshot) => Some(state_event(&snapshot)),
        SessionEvent::MoveApplied { record, snapshot } => {
            Some(wrap(server_event::Event::MoveApplied(
                tempo_proto::MoveApplied {
                    record: Some(record_to_proto(&record)),
                    state: Some(snapshot_to_proto(&snapshot)),
                },
            )))
        }
        SessionEvent::Ended {
            outcome,
            reason,
            snapshot,
        } => Some(wrap(server_event::Event::SessionEnded(
            tempo_proto::SessionEnded {
                outcome: outcome_to_proto(outcome) as i32,
                reason,
                state: Some(snapshot_to_proto(&snapshot)),
            },
        ))),
        SessionEvent::DrawOffered {
            by,
            by_name,
            to_account,
        } => (to_account == identity.account_id).then(|| {
            wrap(server_event::Event::DrawOffered(tempo_proto::DrawOffered {
                by: side_to_proto(by) as i32,
                display_name: by_name,
            }))
        }),
    }
}

fn wrap(event: server_event::Event) -> ServerEvent {
    ServerEvent { event: Some(event) }
}

fn state_event(snapshot: &SessionSnapshot) -> ServerEvent {
    wrap(server_event::Event::State(snapshot_to_proto(snapshot)))
}

fn error_notice(code: &str, message: String) -> ServerEvent {
    wrap(server_event::Event::Error(tempo_proto::ErrorNotice {
        code: code.to_string(),
        message,
    }))
}

/// Per-caller failures become an ErrorNotice on this connection only.
/// Internal failures stay generic.
fn session_error_notice(error: &SessionError) -> ServerEvent {
    let code = match error {
        SessionError::NotFound => "not_found",
        SessionError::Forbidden(_) => "forbidden",
        SessionError::IllegalState(_) => "illegal_state",
        SessionError::InvalidMove(_) => "invalid_move",
        SessionError::Internal(_) => "internal",
    };
    let message = match error {
        SessionError::Internal(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    error_notice(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::time::Duration;

    use tempo_proto as proto;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::persistence::{
        AccountRecord, AccountRepository, Database, SqliteStore,
    };
    use crate::session::{Seat, SessionMode, SessionSettings};

    type OutStream = Pin<Box<dyn Stream<Item = Result<ServerEvent, Status>> + Send>>;

    struct Connection {
        tx: mpsc::Sender<Result<ClientEvent, Status>>,
        out: OutStream,
    }

    impl Connection {
        async fn send(&self, event: ClientEvent) {
            self.tx.send(Ok(event)).await.unwrap();
        }

        async fn next(&mut self) -> server_event::Event {
            tokio::time::timeout(Duration::from_secs(5), self.out.next())
                .await
                .expect("timed out waiting for server event")
                .expect("stream ended")
                .expect("stream errored")
                .event
                .expect("empty server event")
        }

        async fn expect_silence(&mut self) {
            let result =
                tokio::time::timeout(Duration::from_millis(300), self.out.next()).await;
            assert!(result.is_err(), "expected no event, got {result:?}");
        }
    }

    fn connect(manager: &Arc<SessionManager<SqliteStore>>, id: &str, name: &str) -> Connection {
        let (tx, rx) = mpsc::channel(16);
        let identity = Identity {
            account_id: id.to_string(),
            display_name: name.to_string(),
        };
        let out = connection_stream(identity, manager.clone(), ReceiverStream::new(rx));
        Connection {
            tx,
            out: Box::pin(out),
        }
    }

    async fn test_manager() -> Arc<SessionManager<SqliteStore>> {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteStore::new(db.pool().clone());
        for (id, name) in [("acc_a", "alice"), ("acc_b", "bob")] {
            store
                .create_account(&AccountRecord {
                    account_id: id.to_string(),
                    display_name: name.to_string(),
                    secret_hash: "$argon2id$test".to_string(),
                    rating: 1200,
                    games_played: 0,
                    games_won: 0,
                    created_at: 0,
                })
                .await
                .unwrap();
        }
        Arc::new(SessionManager::new(store, SessionSettings::default()))
    }

    async fn create_session(manager: &SessionManager<SqliteStore>) -> String {
        manager
            .create_session(
                Seat {
                    account_id: "acc_a".to_string(),
                    display_name: "alice".to_string(),
                },
                SessionMode::Paired,
                None,
            )
            .await
            .unwrap()
            .session_id
    }

    fn join_event(session_id: &str) -> ClientEvent {
        ClientEvent {
            event: Some(client_event::Event::Join(proto::JoinSession {
                session_id: session_id.to_string(),
            })),
        }
    }

    fn move_event(session_id: &str, from: &str, to: &str) -> ClientEvent {
        ClientEvent {
            event: Some(client_event::Event::MakeMove(proto::MakeMove {
                session_id: session_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                promotion: None,
            })),
        }
    }

    fn offer_draw_event(session_id: &str) -> ClientEvent {
        ClientEvent {
            event: Some(client_event::Event::OfferDraw(proto::OfferDraw {
                session_id: session_id.to_string(),
            })),
        }
    }

    #[tokio::test]
    async fn test_join_then_move_streams_state() {
        let manager = test_manager().await;
        let session_id = create_session(&manager).await;

        let mut alice = connect(&manager, "acc_a", "alice");
        let mut bob = connect(&manager, "acc_b", "bob");

        alice.send(join_event(&session_id)).await;
        match alice.next().await {
            server_event::Event::State(state) => {
                assert_eq!(state.status, proto::SessionStatus::Open as i32);
            }
            other => panic!("expected State, got {other:?}"),
        }

        // Bob joining activates the session; Alice sees it via broadcast.
        bob.send(join_event(&session_id)).await;
        match bob.next().await {
            server_event::Event::State(state) => {
                assert_eq!(state.status, proto::SessionStatus::Active as i32);
            }
            other => panic!("expected State, got {other:?}"),
        }
        match alice.next().await {
            server_event::Event::State(state) => {
                assert_eq!(state.status, proto::SessionStatus::Active as i32);
            }
            other => panic!("expected State, got {other:?}"),
        }

        alice.send(move_event(&session_id, "e2", "e4")).await;
        match alice.next().await {
            server_event::Event::MoveApplied(applied) => {
                assert_eq!(applied.record.unwrap().san, "e4");
            }
            other => panic!("expected MoveApplied, got {other:?}"),
        }
        match bob.next().await {
            server_event::Event::MoveApplied(applied) => {
                let state = applied.state.unwrap();
                assert_eq!(state.side_to_move, proto::Side::Black as i32);
            }
            other => panic!("expected MoveApplied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_session_yields_not_found_notice() {
        let manager = test_manager().await;
        let mut alice = connect(&manager, "acc_a", "alice");

        alice.send(join_event("missing")).await;
        match alice.next().await {
            server_event::Event::Error(notice) => {
                assert_eq!(notice.code, "not_found");
            }
            other => panic!("expected ErrorNotice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_turn_move_yields_forbidden_notice() {
        let manager = test_manager().await;
        let session_id = create_session(&manager).await;

        let mut alice = connect(&manager, "acc_a", "alice");
        let mut bob = connect(&manager, "acc_b", "bob");
        alice.send(join_event(&session_id)).await;
        alice.next().await;
        bob.send(join_event(&session_id)).await;
        bob.next().await;

        bob.send(move_event(&session_id, "e7", "e5")).await;
        match bob.next().await {
            server_event::Event::Error(notice) => {
                assert_eq!(notice.code, "forbidden");
            }
            other => panic!("expected ErrorNotice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_draw_offer_reaches_only_the_opponent() {
        let manager = test_manager().await;
        let session_id = create_session(&manager).await;

        let mut alice = connect(&manager, "acc_a", "alice");
        let mut bob = connect(&manager, "acc_b", "bob");
        alice.send(join_event(&session_id)).await;
        alice.next().await; // open snapshot
        bob.send(join_event(&session_id)).await;
        bob.next().await; // active snapshot
        alice.next().await; // activation broadcast

        alice.send(offer_draw_event(&session_id)).await;
        match bob.next().await {
            server_event::Event::DrawOffered(offer) => {
                assert_eq!(offer.by, proto::Side::White as i32);
                assert_eq!(offer.display_name, "alice");
            }
            other => panic!("expected DrawOffered, got {other:?}"),
        }
        // The offering side's connection does not see its own offer.
        alice.expect_silence().await;
    }

    #[tokio::test]
    async fn test_malformed_move_yields_invalid_move_notice() {
        let manager = test_manager().await;
        let session_id = create_session(&manager).await;
        let mut alice = connect(&manager, "acc_a", "alice");

        alice.send(move_event(&session_id, "z9", "e4")).await;
        match alice.next().await {
            server_event::Event::Error(notice) => {
                assert_eq!(notice.code, "invalid_move");
            }
            other => panic!("expected ErrorNotice, got {other:?}"),
        }
    }
}
