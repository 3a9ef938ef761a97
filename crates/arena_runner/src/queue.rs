//! Admission-controlled source of claimed games.
//!
//! The queue claims a game from the job store only while fewer than
//! `queue_limit` games are held. Consumers [`hold`](GameQueue::hold) a slot
//! for every game they take and [`release`](GameQueue::release) it when the
//! game is over. Claim failures never end the sequence; they are logged and
//! retried on the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::Stream;
use tokio::sync::watch;
use tracing::{debug, warn};

use arena_model::Game;
use arena_store::JobStore;

use crate::config::{AdmissionConfig, ConfigError};

pub struct GameQueue {
    store: Arc<dyn JobStore>,
    config: AdmissionConfig,
    held: AtomicUsize,
}

impl GameQueue {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(store: Arc<dyn JobStore>, config: AdmissionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            held: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Take an admission slot for a game about to be played.
    pub fn hold(&self) {
        self.held.fetch_add(1, Ordering::SeqCst);
    }

    /// Give back a slot taken by [`GameQueue::hold`].
    pub fn release(&self) {
        let _ = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                Some(held.saturating_sub(1))
            });
    }

    /// Number of games currently held.
    #[must_use]
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.held() < self.config.queue_limit
    }

    /// Claim one game if a slot is free and a game is queued.
    ///
    /// At capacity no claim is attempted.
    pub async fn try_next(&self) -> Option<Game> {
        if !self.has_capacity() {
            return None;
        }
        match self.store.claim_next_queued_game().await {
            Ok(Some(game)) => {
                debug!(game_id = game.id, held = self.held(), "claimed game");
                Some(game)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "failed to claim a queued game");
                None
            }
        }
    }

    /// Wait for the next claimable game.
    pub async fn next(&self) -> Game {
        loop {
            if let Some(game) = self.try_next().await {
                return game;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Like [`GameQueue::next`], but gives up once `stop` turns `true` or its
    /// sender is dropped.
    ///
    /// Only the wait between claims is interrupted, never a claim in
    /// progress, so a claimed game is always returned.
    pub async fn next_until(&self, stop: &mut watch::Receiver<bool>) -> Option<Game> {
        loop {
            if *stop.borrow_and_update() {
                return None;
            }
            if let Some(game) = self.try_next().await {
                return Some(game);
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Endless stream of claimed games.
    pub fn games(self: Arc<Self>) -> impl Stream<Item = Game> {
        futures::stream::unfold(self, |queue| async move {
            let game = queue.next().await;
            Some((game, queue))
        })
    }
}
