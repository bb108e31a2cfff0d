//! SQLite-backed account repository.

use super::traits::AccountRepository;
use super::{AccountRecord, PersistenceError, SqliteStore};

/// Row type for account queries, mapped via `sqlx::FromRow`.
#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: String,
    display_name: String,
    secret_hash: String,
    rating: i64,
    games_played: i64,
    games_won: i64,
    created_at: i64,
}

impl From<AccountRow> for AccountRecord {
    fn from(r: AccountRow) -> Self {
        Self {
            account_id: r.account_id,
            display_name: r.display_name,
            secret_hash: r.secret_hash,
            rating: r.rating,
            games_played: r.games_played as u32,
            games_won: r.games_won as u32,
            created_at: r.created_at as u64,
        }
    }
}

const ACCOUNT_COLUMNS: &str =
    "account_id, display_name, secret_hash, rating, games_played, games_won, created_at";

impl AccountRepository for SqliteStore {
    async fn create_account(&self, data: &AccountRecord) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts
                (account_id, display_name, secret_hash, rating, games_played,
                 games_won, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&data.account_id)
        .bind(&data.display_name)
        .bind(&data.secret_hash)
        .bind(data.rating)
        .bind(data.games_played as i64)
        .bind(data.games_won as i64)
        .bind(data.created_at as i64)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(PersistenceError::DuplicateName)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_account(&self, id: &str) -> Result<Option<AccountRecord>, PersistenceError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(AccountRecord::from))
    }

    async fn find_account_by_name(
        &self,
        name: &str,
    ) -> Result<Option<AccountRecord>, PersistenceError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE display_name = ?"
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(AccountRecord::from))
    }

    async fn update_stats(
        &self,
        id: &str,
        rating: i64,
        games_played: u32,
        games_won: u32,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE accounts SET rating = ?, games_played = ?, games_won = ? WHERE account_id = ?",
        )
        .bind(rating)
        .bind(games_played as i64)
        .bind(games_won as i64)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn leaderboard(&self, limit: u32) -> Result<Vec<AccountRecord>, PersistenceError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY rating DESC, games_won DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(AccountRecord::from).collect())
    }
}
