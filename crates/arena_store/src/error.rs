//! Job store error types.

use arena_model::{GameId, ModelError};

/// Errors that can occur while talking to the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected a query or could not be reached.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A claimed game did not have enough submissions to be played.
    #[error("game {game_id} has {count} submissions, at least 2 are required")]
    NotEnoughSubmissions {
        /// The claimed game, now marked failed.
        game_id: GameId,
        /// How many submissions it had.
        count: usize,
    },

    /// A game was recorded as finished without a winner.
    #[error("game {0} cannot be recorded as finished without a winner")]
    MissingWinner(GameId),

    /// The game is unknown to the store.
    #[error("game {0} not found")]
    GameNotFound(GameId),

    /// The store is not available (in-memory store failure injection, poisoned state).
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotEnoughSubmissions { game_id, count } => {
                Self::NotEnoughSubmissions { game_id, count }
            }
        }
    }
}
