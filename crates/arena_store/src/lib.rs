//! # arena_store
//!
//! The job store holds queued games and receives their results.
//!
//! The [`JobStore`] trait is the only view the runner has of it:
//!
//! - [`postgres`]: the production backend (sqlx, row-locked claims).
//! - [`memory`]: an in-process backend for tests and local runs.
//! - [`error`]: store error types.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use arena_model::{Game, GameId};

pub use error::StoreError;
pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;
pub use sqlx::postgres::PgConnectOptions;

/// Result alias for job store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Persistence contract for games.
///
/// Implementations are shared by every in-flight game and must accept
/// concurrent calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically take the oldest queued game, moving it to `playing`.
    ///
    /// Returns `Ok(None)` when nothing is queued. A claimed game with fewer
    /// than two submissions fails the claim with
    /// [`StoreError::NotEnoughSubmissions`] and is not re-queued.
    async fn claim_next_queued_game(&self) -> Result<Option<Game>>;

    /// Persist every submission's `output_url`.
    async fn record_submission_outputs(&self, game: &Game) -> Result<()>;

    /// Persist a finished game with its winner and reasons.
    ///
    /// Fails with [`StoreError::MissingWinner`] if `game.winner` is unset.
    async fn record_game_finished(&self, game: &Game) -> Result<()>;

    /// Mark a game as failed.
    async fn record_game_failed(&self, game_id: GameId) -> Result<()>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}
