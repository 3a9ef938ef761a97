//! In-memory job store.
//!
//! [`InMemoryJobStore`] keeps queued games in FIFO order and records every
//! write so tests can assert on what was persisted.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, single process only.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use arena_model::{Game, GameId, GameStatus, Submission, SubmissionId};

use crate::{JobStore, Result, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    queue: VecDeque<(GameId, Vec<Submission>)>,
    statuses: HashMap<GameId, GameStatus>,
    finished: HashMap<GameId, Game>,
    outputs: HashMap<SubmissionId, String>,
    claims: usize,
    unavailable: bool,
}

/// In-memory store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(poison_err)
    }

    fn available_state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self.state()?;
        if state.unavailable {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(state)
    }

    /// Queue a game behind every game already queued.
    pub fn enqueue(&self, game_id: GameId, submissions: Vec<Submission>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.queue.push_back((game_id, submissions));
        state.statuses.insert(game_id, GameStatus::Queued);
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    /// Number of games successfully claimed so far.
    #[must_use]
    pub fn claim_count(&self) -> usize {
        self.state.lock().map(|s| s.claims).unwrap_or(0)
    }

    /// Number of games still queued.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// The last persisted status of a game.
    #[must_use]
    pub fn status(&self, game_id: GameId) -> Option<GameStatus> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.statuses.get(&game_id).copied())
    }

    /// The game as it was recorded finished.
    #[must_use]
    pub fn finished_game(&self, game_id: GameId) -> Option<Game> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.finished.get(&game_id).cloned())
    }

    /// The recorded output URL of a submission.
    #[must_use]
    pub fn output_url(&self, submission_id: SubmissionId) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.outputs.get(&submission_id).cloned())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn claim_next_queued_game(&self) -> Result<Option<Game>> {
        let mut state = self.available_state()?;
        let Some((game_id, submissions)) = state.queue.pop_front() else {
            return Ok(None);
        };
        match Game::claimed(game_id, submissions) {
            Ok(game) => {
                state.statuses.insert(game_id, GameStatus::Playing);
                state.claims += 1;
                Ok(Some(game))
            }
            Err(err) => {
                state.statuses.insert(game_id, GameStatus::Failed);
                Err(err.into())
            }
        }
    }

    async fn record_submission_outputs(&self, game: &Game) -> Result<()> {
        let mut state = self.available_state()?;
        for submission in &game.submissions {
            if let Some(url) = &submission.output_url {
                state.outputs.insert(submission.id, url.clone());
            }
        }
        Ok(())
    }

    async fn record_game_finished(&self, game: &Game) -> Result<()> {
        let mut state = self.available_state()?;
        if game.winner.is_none() {
            return Err(StoreError::MissingWinner(game.id));
        }
        if !state.statuses.contains_key(&game.id) {
            return Err(StoreError::GameNotFound(game.id));
        }
        state.statuses.insert(game.id, GameStatus::Finished);
        let mut recorded = game.clone();
        recorded.status = GameStatus::Finished;
        state.finished.insert(game.id, recorded);
        Ok(())
    }

    async fn record_game_failed(&self, game_id: GameId) -> Result<()> {
        let mut state = self.available_state()?;
        match state.statuses.get_mut(&game_id) {
            Some(status) => {
                *status = GameStatus::Failed;
                Ok(())
            }
            None => Err(StoreError::GameNotFound(game_id)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.available_state().map(|_| ())
    }
}
