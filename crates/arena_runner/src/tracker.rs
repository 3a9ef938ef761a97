//! In-flight games, for status reporting.

use std::sync::Arc;

use dashmap::DashMap;

use arena_model::{Game, GameId};

/// Games currently being played, keyed by id.
///
/// Cloning shares the same map. The player publishes every status change;
/// a game is dropped once its terminal state has been persisted.
#[derive(Debug, Clone, Default)]
pub struct GameTracker {
    games: Arc<DashMap<GameId, Game>>,
}

impl GameTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the tracked copy of `game`.
    pub fn update(&self, game: &Game) {
        self.games.insert(game.id, game.clone());
    }

    pub fn remove(&self, game_id: GameId) -> Option<Game> {
        self.games.remove(&game_id).map(|(_, game)| game)
    }

    #[must_use]
    pub fn get(&self, game_id: GameId) -> Option<Game> {
        self.games.get(&game_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.games.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Every tracked game, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Game> {
        let mut games: Vec<Game> = self.games.iter().map(|entry| entry.value().clone()).collect();
        games.sort_by_key(|game| game.id);
        games
    }
}
