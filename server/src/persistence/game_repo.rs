//! SQLite-backed game repository.

use sqlx::SqlitePool;

use super::traits::GameRepository;
use super::{GameRecord, PersistenceError, SqliteStore, StoredMove};

/// Row type for game queries, mapped via `sqlx::FromRow`.
#[derive(sqlx::FromRow)]
struct GameRow {
    session_id: String,
    mode: String,
    status: String,
    outcome: Option<String>,
    outcome_reason: Option<String>,
    white_account_id: Option<String>,
    white_name: Option<String>,
    black_account_id: Option<String>,
    black_name: Option<String>,
    fen: String,
    side_to_move: String,
    move_count: i64,
    initial_ms: Option<i64>,
    increment_ms: Option<i64>,
    white_remaining_ms: Option<i64>,
    black_remaining_ms: Option<i64>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl GameRow {
    fn into_game(self, moves: Vec<StoredMove>) -> GameRecord {
        GameRecord {
            session_id: self.session_id,
            mode: self.mode,
            status: self.status,
            outcome: self.outcome,
            outcome_reason: self.outcome_reason,
            white_account_id: self.white_account_id,
            white_name: self.white_name,
            black_account_id: self.black_account_id,
            black_name: self.black_name,
            fen: self.fen,
            side_to_move: self.side_to_move,
            move_count: self.move_count as u32,
            initial_ms: self.initial_ms.map(|v| v as u64),
            increment_ms: self.increment_ms.map(|v| v as u64),
            white_remaining_ms: self.white_remaining_ms.map(|v| v as u64),
            black_remaining_ms: self.black_remaining_ms.map(|v| v as u64),
            moves,
            created_at: self.created_at as u64,
            started_at: self.started_at.map(|v| v as u64),
            finished_at: self.finished_at.map(|v| v as u64),
        }
    }
}

/// Row type for move queries, mapped via `sqlx::FromRow`.
#[derive(sqlx::FromRow)]
struct MoveRow {
    mv_from: String,
    mv_to: String,
    promotion: Option<String>,
    san: String,
    fen_after: String,
    clock_ms: Option<i64>,
}

impl From<MoveRow> for StoredMove {
    fn from(r: MoveRow) -> Self {
        Self {
            from: r.mv_from,
            to: r.mv_to,
            promotion: r.promotion,
            san: r.san,
            fen_after: r.fen_after,
            clock_ms: r.clock_ms.map(|v| v as u64),
        }
    }
}

const GAME_COLUMNS: &str = "session_id, mode, status, outcome, outcome_reason, \
     white_account_id, white_name, black_account_id, black_name, \
     fen, side_to_move, move_count, initial_ms, increment_ms, \
     white_remaining_ms, black_remaining_ms, created_at, started_at, finished_at";

impl GameRepository for SqliteStore {
    async fn save_game(&self, data: &GameRecord) -> Result<(), PersistenceError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO games
                (session_id, mode, status, outcome, outcome_reason,
                 white_account_id, white_name, black_account_id, black_name,
                 fen, side_to_move, move_count, initial_ms, increment_ms,
                 white_remaining_ms, black_remaining_ms, created_at,
                 started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&data.session_id)
        .bind(&data.mode)
        .bind(&data.status)
        .bind(&data.outcome)
        .bind(&data.outcome_reason)
        .bind(&data.white_account_id)
        .bind(&data.white_name)
        .bind(&data.black_account_id)
        .bind(&data.black_name)
        .bind(&data.fen)
        .bind(&data.side_to_move)
        .bind(data.move_count as i64)
        .bind(data.initial_ms.map(|v| v as i64))
        .bind(data.increment_ms.map(|v| v as i64))
        .bind(data.white_remaining_ms.map(|v| v as i64))
        .bind(data.black_remaining_ms.map(|v| v as i64))
        .bind(data.created_at as i64)
        .bind(data.started_at.map(|v| v as i64))
        .bind(data.finished_at.map(|v| v as i64))
        .execute(&mut *tx)
        .await?;

        // Delete existing moves for this game before re-inserting
        sqlx::query("DELETE FROM game_moves WHERE game_id = ?")
            .bind(&data.session_id)
            .execute(&mut *tx)
            .await?;

        for (ply, mv) in data.moves.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO game_moves
                    (game_id, ply, mv_from, mv_to, promotion, san, fen_after, clock_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&data.session_id)
            .bind(ply as i64)
            .bind(&mv.from)
            .bind(&mv.to)
            .bind(&mv.promotion)
            .bind(&mv.san)
            .bind(&mv.fen_after)
            .bind(mv.clock_ms.map(|v| v as i64))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_game(&self, id: &str) -> Result<Option<GameRecord>, PersistenceError> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE session_id = ?"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;

        match row {
            None => Ok(None),
            Some(r) => {
                let moves = load_moves_for_game(self.pool(), &r.session_id).await?;
                Ok(Some(r.into_game(moves)))
            }
        }
    }

    async fn list_open_games(&self) -> Result<Vec<GameRecord>, PersistenceError> {
        let rows: Vec<GameRow> = sqlx::query_as(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE status = 'open' ORDER BY created_at DESC"
        ))
        .fetch_all(self.pool())
        .await?;

        collect_with_moves(self.pool(), rows).await
    }

    async fn list_account_games(
        &self,
        account_id: &str,
    ) -> Result<Vec<GameRecord>, PersistenceError> {
        let rows: Vec<GameRow> = sqlx::query_as(&format!(
            "SELECT {GAME_COLUMNS} FROM games \
             WHERE white_account_id = ? OR black_account_id = ? \
             ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .bind(account_id)
        .fetch_all(self.pool())
        .await?;

        collect_with_moves(self.pool(), rows).await
    }
}

async fn collect_with_moves(
    pool: &SqlitePool,
    rows: Vec<GameRow>,
) -> Result<Vec<GameRecord>, PersistenceError> {
    let mut games = Vec::with_capacity(rows.len());
    for row in rows {
        let moves = load_moves_for_game(pool, &row.session_id).await?;
        games.push(row.into_game(moves));
    }
    Ok(games)
}

/// Load all moves for a game ordered by ply.
async fn load_moves_for_game(
    pool: &SqlitePool,
    game_id: &str,
) -> Result<Vec<StoredMove>, PersistenceError> {
    let rows: Vec<MoveRow> = sqlx::query_as(
        r#"
        SELECT mv_from, mv_to, promotion, san, fen_after, clock_ms
        FROM game_moves
        WHERE game_id = ?
        ORDER BY ply
        "#,
    )
    .bind(game_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StoredMove::from).collect())
}
