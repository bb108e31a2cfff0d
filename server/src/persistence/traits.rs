//! Async repository trait definitions for the persistence layer.
//!
//! Methods return `impl Future + Send` rather than using `async fn` so that
//! the futures are guaranteed `Send` — required by tonic's `#[async_trait]`
//! and `tokio::spawn`. Callers are generic over the traits (static dispatch).

use std::future::Future;

use super::{AccountRecord, GameRecord, PersistenceError};

/// Repository for player accounts.
pub trait AccountRepository: Send + Sync {
    /// Insert a new account. Fails with `DuplicateName` when the display
    /// name is taken.
    fn create_account(
        &self,
        data: &AccountRecord,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn find_account(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<AccountRecord>, PersistenceError>> + Send;

    fn find_account_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<AccountRecord>, PersistenceError>> + Send;

    /// Replace the mutable counters of one account. Called exactly once per
    /// finished session per seated account.
    fn update_stats(
        &self,
        id: &str,
        rating: i64,
        games_played: u32,
        games_won: u32,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn leaderboard(
        &self,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<AccountRecord>, PersistenceError>> + Send;
}

/// Repository for game sessions.
///
/// `save_game` must store the move list atomically with the header row; each
/// save fully replaces the previous durable copy.
pub trait GameRepository: Send + Sync {
    fn save_game(
        &self,
        data: &GameRecord,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn load_game(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<GameRecord>, PersistenceError>> + Send;

    fn list_open_games(
        &self,
    ) -> impl Future<Output = Result<Vec<GameRecord>, PersistenceError>> + Send;

    fn list_account_games(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<Vec<GameRecord>, PersistenceError>> + Send;
}

/// Everything the session engine needs from storage.
pub trait Store: AccountRepository + GameRepository + Clone + Send + Sync + 'static {}

impl<T> Store for T where T: AccountRepository + GameRepository + Clone + Send + Sync + 'static {}
