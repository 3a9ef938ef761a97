//! Postgres job store.
//!
//! Works against the platform schema:
//!
//! - `games(id, status, created_at, winner_id, win_reason, lose_reason, log_url)`
//! - `games_submissions(id, game_id, submission_id, output_url)`
//! - `submissions(id, image_name, version, team_id)`
//! - `teams(id, name)`
//!
//! A submission's id in the runner is the `games_submissions` row id, so the
//! same submission entered in two games gets two distinct ids.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, warn};

use arena_model::{Game, GameId, Submission, Team};

use crate::{JobStore, Result, StoreError};

/// Default number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const CLAIM_OLDEST_QUEUED: &str = "\
UPDATE games SET status = 'playing'
WHERE id = (
    SELECT id FROM games
    WHERE status = 'queued'
    ORDER BY created_at
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
RETURNING id::bigint AS id";

const SELECT_SUBMISSIONS: &str = "\
SELECT gs.id::bigint AS id,
       s.image_name AS image,
       s.version::bigint AS version,
       t.id::bigint AS team_id,
       t.name AS team_name
FROM games_submissions gs
JOIN submissions s ON s.id = gs.submission_id
JOIN teams t ON t.id = s.team_id
WHERE gs.game_id = $1
ORDER BY t.id";

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: i64,
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    image: String,
    version: i64,
    team_id: i64,
    team_name: String,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        Self {
            id: row.id,
            team: Team {
                id: row.team_id,
                name: row.team_name,
            },
            image: row.image,
            version: row.version,
            output_url: None,
        }
    }
}

/// A [`JobStore`] backed by a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "job store connected");
        Ok(Self { pool })
    }

    /// Connect a new pool with explicit connection options.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot be created.
    pub async fn connect_with(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let host = options.get_host().to_string();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        info!(%host, max_connections, "job store connected");
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_next_queued_game(&self) -> Result<Option<Game>> {
        let mut tx = self.pool.begin().await?;

        let Some(ClaimedRow { id }) = sqlx::query_as::<_, ClaimedRow>(CLAIM_OLDEST_QUEUED)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let submissions: Vec<Submission> = sqlx::query_as::<_, SubmissionRow>(SELECT_SUBMISSIONS)
            .bind(id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(Submission::from)
            .collect();

        match Game::claimed(id, submissions) {
            Ok(game) => {
                tx.commit().await?;
                Ok(Some(game))
            }
            Err(err) => {
                // Never hand the row back to the queue: it would be claimed again every tick.
                sqlx::query("UPDATE games SET status = 'failed' WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                warn!(game_id = id, error = %err, "claimed game is not playable, marked failed");
                Err(err.into())
            }
        }
    }

    async fn record_submission_outputs(&self, game: &Game) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for submission in &game.submissions {
            sqlx::query("UPDATE games_submissions SET output_url = $1 WHERE id = $2")
                .bind(submission.output_url.as_deref())
                .bind(submission.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_game_finished(&self, game: &Game) -> Result<()> {
        let winner = game
            .winner
            .as_ref()
            .ok_or(StoreError::MissingWinner(game.id))?;

        let updated = sqlx::query(
            "UPDATE games \
             SET status = 'finished', winner_id = $1, win_reason = $2, lose_reason = $3, log_url = $4 \
             WHERE id = $5",
        )
        .bind(winner.team.id)
        .bind(game.win_reason.as_deref())
        .bind(game.lose_reason.as_deref())
        .bind(game.log_url.as_deref())
        .bind(game.id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::GameNotFound(game.id));
        }
        Ok(())
    }

    async fn record_game_failed(&self, game_id: GameId) -> Result<()> {
        let updated = sqlx::query("UPDATE games SET status = 'failed' WHERE id = $1")
            .bind(game_id)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::GameNotFound(game_id));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
