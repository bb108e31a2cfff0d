//! Persistence layer: SQLite-backed repositories for accounts and games.
//!
//! The live session engine is the only writer of game rows; it writes through
//! the repository traits after every accepted event and before the matching
//! broadcast. Rows are never deleted here — eviction only removes the
//! in-memory session.

mod account_repo;
mod database;
mod game_repo;
pub mod traits;

pub use database::Database;
pub use traits::{AccountRepository, GameRepository, Store};

use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("display name already taken")]
    DuplicateName,
}

/// One row per account. `secret_hash` is an argon2 PHC string; the cleartext
/// secret is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account_id: String,
    pub display_name: String,
    pub secret_hash: String,
    pub rating: i64,
    pub games_played: u32,
    pub games_won: u32,
    pub created_at: u64,
}

/// Durable copy of a session: header fields plus the full move list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub session_id: String,
    pub mode: String,
    pub status: String,
    pub outcome: Option<String>,
    pub outcome_reason: Option<String>,
    pub white_account_id: Option<String>,
    pub white_name: Option<String>,
    pub black_account_id: Option<String>,
    pub black_name: Option<String>,
    pub fen: String,
    pub side_to_move: String,
    pub move_count: u32,
    pub initial_ms: Option<u64>,
    pub increment_ms: Option<u64>,
    pub white_remaining_ms: Option<u64>,
    pub black_remaining_ms: Option<u64>,
    pub moves: Vec<StoredMove>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMove {
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
    pub san: String,
    pub fen_after: String,
    pub clock_ms: Option<u64>,
}

/// SQLite implementation of both repository traits, sharing one pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Get the current unix timestamp in seconds.
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
