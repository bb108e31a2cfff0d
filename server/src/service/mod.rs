//! gRPC service implementation.
//!
//! Unary endpoints cover accounts and lobby reads; the `Play` stream is the
//! real-time channel into the session engine. Every session-scoped call is
//! authenticated from request metadata before any session logic runs.

mod converters;
mod play;

use std::pin::Pin;
use std::sync::Arc;

use tempo_proto::tempo_service_server::TempoService;
use tempo_proto::{
    AuthRequest, AuthResponse, ClientEvent, CreateSessionRequest, Empty, LeaderboardRequest,
    LeaderboardResponse, RegisterRequest, ServerEvent, SessionList, SessionSnapshot,
};
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use crate::auth::{self, Identity, TokenKeys};
use crate::persistence::{
    self, AccountRecord, AccountRepository, GameRepository, PersistenceError, Store,
};
use crate::session::{Seat, SessionError, SessionManager};

use converters::{
    account_to_proto, game_record_to_proto, parse_mode, parse_time_control, snapshot_to_proto,
};

const MAX_DISPLAY_NAME_LEN: usize = 32;
const MIN_SECRET_LEN: usize = 4;
const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;
const MAX_LEADERBOARD_LIMIT: u32 = 100;

/// Implementation of the TempoService gRPC service.
pub struct TempoServiceImpl<S: Store> {
    manager: Arc<SessionManager<S>>,
    store: S,
    tokens: TokenKeys,
}

impl<S: Store> TempoServiceImpl<S> {
    pub fn new(manager: Arc<SessionManager<S>>, store: S, tokens: TokenKeys) -> Self {
        Self {
            manager,
            store,
            tokens,
        }
    }

    /// Verify the bearer credential before any session logic runs.
    fn identity<T>(&self, request: &Request<T>) -> Result<Identity, Status> {
        auth::identity_from_metadata(request.metadata(), &self.tokens)
            .map_err(|_| Status::unauthenticated("invalid credentials"))
    }
}

#[tonic::async_trait]
impl<S: Store> TempoService for TempoServiceImpl<S> {
    // =========================================================================
    // Account Endpoints
    // =========================================================================

    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(display_name = %req.display_name, "RPC register");

        let name = req.display_name.trim();
        if name.is_empty() || name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(Status::invalid_argument(
                "display name must be 1-32 characters",
            ));
        }
        if req.secret.len() < MIN_SECRET_LEN {
            return Err(Status::invalid_argument("secret is too short"));
        }

        let secret_hash =
            auth::hash_secret(&req.secret).map_err(|_| Status::internal("registration failed"))?;
        let record = AccountRecord {
            account_id: Uuid::new_v4().to_string(),
            display_name: name.to_string(),
            secret_hash,
            rating: 1200,
            games_played: 0,
            games_won: 0,
            created_at: persistence::now_timestamp(),
        };

        match self.store.create_account(&record).await {
            Ok(()) => {}
            Err(PersistenceError::DuplicateName) => {
                return Err(Status::already_exists("display name already taken"));
            }
            Err(e) => {
                tracing::error!(error = %e, "account insert failed");
                return Err(Status::internal("registration failed"));
            }
        }

        let token = self
            .tokens
            .issue(&record.account_id, &record.display_name)
            .map_err(|_| Status::internal("registration failed"))?;
        Ok(Response::new(AuthResponse {
            token,
            account: Some(account_to_proto(&record)),
        }))
    }

    async fn authenticate(
        &self,
        request: Request<AuthRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(display_name = %req.display_name, "RPC authenticate");

        // Unknown name and wrong secret yield the same generic failure.
        let rejected = || Status::unauthenticated("invalid display name or secret");

        let account = self
            .store
            .find_account_by_name(req.display_name.trim())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "account lookup failed");
                Status::internal("authentication failed")
            })?
            .ok_or_else(rejected)?;

        if !auth::verify_secret(&req.secret, &account.secret_hash) {
            return Err(rejected());
        }

        let token = self
            .tokens
            .issue(&account.account_id, &account.display_name)
            .map_err(|_| Status::internal("authentication failed"))?;
        Ok(Response::new(AuthResponse {
            token,
            account: Some(account_to_proto(&account)),
        }))
    }

    // =========================================================================
    // Lobby Endpoints
    // =========================================================================

    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<SessionSnapshot>, Status> {
        let identity = self.identity(&request)?;
        let req = request.into_inner();
        tracing::info!(account = %identity.account_id, mode = req.mode, "RPC create_session");

        let mode = parse_mode(req.mode)?;
        let time_control = parse_time_control(req.time_control)?;
        let creator = Seat {
            account_id: identity.account_id,
            display_name: identity.display_name,
        };

        let snapshot = self
            .manager
            .create_session(creator, mode, time_control)
            .await
            .map_err(|e| match e {
                SessionError::Internal(_) => Status::internal("session creation failed"),
                other => Status::invalid_argument(other.to_string()),
            })?;

        Ok(Response::new(snapshot_to_proto(&snapshot)))
    }

    async fn list_open_sessions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<SessionList>, Status> {
        tracing::debug!("RPC list_open_sessions");
        let games = self.store.list_open_games().await.map_err(|e| {
            tracing::error!(error = %e, "open session listing failed");
            Status::internal("listing failed")
        })?;

        Ok(Response::new(SessionList {
            sessions: games.iter().map(game_record_to_proto).collect(),
        }))
    }

    async fn list_account_sessions(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<SessionList>, Status> {
        let identity = self.identity(&request)?;
        tracing::debug!(account = %identity.account_id, "RPC list_account_sessions");

        let games = self
            .store
            .list_account_games(&identity.account_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "account session listing failed");
                Status::internal("listing failed")
            })?;

        Ok(Response::new(SessionList {
            sessions: games.iter().map(game_record_to_proto).collect(),
        }))
    }

    async fn leaderboard(
        &self,
        request: Request<LeaderboardRequest>,
    ) -> Result<Response<LeaderboardResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(limit = req.limit, "RPC leaderboard");

        let limit = if req.limit == 0 {
            DEFAULT_LEADERBOARD_LIMIT
        } else {
            req.limit.min(MAX_LEADERBOARD_LIMIT)
        };
        let accounts = self.store.leaderboard(limit).await.map_err(|e| {
            tracing::error!(error = %e, "leaderboard query failed");
            Status::internal("listing failed")
        })?;

        Ok(Response::new(LeaderboardResponse {
            accounts: accounts.iter().map(account_to_proto).collect(),
        }))
    }

    // =========================================================================
    // Real-time Channel
    // =========================================================================

    type PlayStream = Pin<Box<dyn Stream<Item = Result<ServerEvent, Status>> + Send>>;

    async fn play(
        &self,
        request: Request<Streaming<ClientEvent>>,
    ) -> Result<Response<Self::PlayStream>, Status> {
        let identity = self.identity(&request)?;
        tracing::info!(account = %identity.account_id, "RPC play");

        let inbound = request.into_inner();
        let stream = play::connection_stream(identity, self.manager.clone(), inbound);
        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_proto as proto;

    use crate::persistence::{Database, SqliteStore};
    use crate::session::SessionSettings;

    async fn test_service() -> TempoServiceImpl<SqliteStore> {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteStore::new(db.pool().clone());
        let manager = Arc::new(SessionManager::new(store.clone(), SessionSettings::default()));
        TempoServiceImpl::new(manager, store, TokenKeys::new("test-secret"))
    }

    fn authed<T>(message: T, token: &str) -> Request<T> {
        let mut request = Request::new(message);
        request.metadata_mut().insert(
            "authorization",
            format!("Bearer {token}").parse().unwrap(),
        );
        request
    }

    async fn register(service: &TempoServiceImpl<SqliteStore>, name: &str) -> String {
        let response = service
            .register(Request::new(RegisterRequest {
                display_name: name.to_string(),
                secret: "hunter2".to_string(),
            }))
            .await
            .unwrap();
        response.into_inner().token
    }

    #[tokio::test]
    async fn test_register_issues_verifiable_token() {
        let service = test_service().await;
        let response = service
            .register(Request::new(RegisterRequest {
                display_name: "alice".to_string(),
                secret: "hunter2".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        let account = response.account.unwrap();
        assert_eq!(account.display_name, "alice");
        assert_eq!(account.rating, 1200);

        let identity = service.tokens.verify(&response.token).unwrap();
        assert_eq!(identity.display_name, "alice");
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_name() {
        let service = test_service().await;
        register(&service, "alice").await;

        let result = service
            .register(Request::new(RegisterRequest {
                display_name: "alice".to_string(),
                secret: "other-secret".to_string(),
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::AlreadyExists);
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let service = test_service().await;

        let result = service
            .register(Request::new(RegisterRequest {
                display_name: "  ".to_string(),
                secret: "hunter2".to_string(),
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);

        let result = service
            .register(Request::new(RegisterRequest {
                display_name: "alice".to_string(),
                secret: "x".to_string(),
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_authenticate_does_not_leak_which_field_was_wrong() {
        let service = test_service().await;
        register(&service, "alice").await;

        let unknown = service
            .authenticate(Request::new(AuthRequest {
                display_name: "nobody".to_string(),
                secret: "hunter2".to_string(),
            }))
            .await
            .unwrap_err();
        let wrong_secret = service
            .authenticate(Request::new(AuthRequest {
                display_name: "alice".to_string(),
                secret: "wrong".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(unknown.code(), tonic::Code::Unauthenticated);
        assert_eq!(wrong_secret.code(), tonic::Code::Unauthenticated);
        assert_eq!(unknown.message(), wrong_secret.message());
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let service = test_service().await;
        register(&service, "alice").await;

        let response = service
            .authenticate(Request::new(AuthRequest {
                display_name: "alice".to_string(),
                secret: "hunter2".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(service.tokens.verify(&response.token).is_ok());
    }

    #[tokio::test]
    async fn test_create_session_requires_credential() {
        let service = test_service().await;
        let result = service
            .create_session(Request::new(CreateSessionRequest {
                mode: proto::SessionMode::Paired as i32,
                time_control: None,
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_create_session_and_list_open() {
        let service = test_service().await;
        let token = register(&service, "alice").await;

        let snapshot = service
            .create_session(authed(
                CreateSessionRequest {
                    mode: proto::SessionMode::Paired as i32,
                    time_control: Some(proto::TimeControl {
                        initial_ms: 300_000,
                        increment_ms: 2_000,
                    }),
                },
                &token,
            ))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(snapshot.status, proto::SessionStatus::Open as i32);
        assert_eq!(snapshot.white_seat.unwrap().display_name, "alice");

        let open = service
            .list_open_sessions(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(open.sessions.len(), 1);
        assert_eq!(open.sessions[0].session_id, snapshot.session_id);

        let mine = service
            .list_account_sessions(authed(Empty {}, &token))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(mine.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_orders_by_rating() {
        let service = test_service().await;
        register(&service, "alice").await;
        register(&service, "bob").await;

        let board = service
            .leaderboard(Request::new(LeaderboardRequest { limit: 0 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(board.accounts.len(), 2);
        assert!(board.accounts[0].rating >= board.accounts[1].rating);
    }
}
