//! Plays one claimed game from image pull to persisted outcome.
//!
//! Every game ends `finished` or `failed`. Each step of [`Player::play`]
//! gates the next; any error funnels into a single failure path that stops
//! every client, closes every log and persists `failed`.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use tracing::{error, info, warn};

use arena_model::naming::output_url;
use arena_model::{Game, GameStatus};
use arena_store::{JobStore, StoreError};

use crate::client::ContainerClient;
use crate::config::{ConfigError, ContainerLimits, GameServerConfig, PlayConfig};
use crate::engine::{ContainerEngine, ContainerSpec};
use crate::error::PlayError;
use crate::game_server::MatchResults;
use crate::log_sink::LogSink;
use crate::tracker::GameTracker;

/// Drives games through their clients and records the result.
pub struct Player {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ContainerEngine>,
    results: Arc<dyn MatchResults>,
    game_server: GameServerConfig,
    limits: ContainerLimits,
    config: PlayConfig,
    tracker: GameTracker,
}

impl Player {
    /// Create a player. The configs are validated here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the play config or the container limits are
    /// invalid.
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ContainerEngine>,
        results: Arc<dyn MatchResults>,
        game_server: GameServerConfig,
        limits: ContainerLimits,
        config: PlayConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        limits.validate()?;
        Ok(Self {
            store,
            engine,
            results,
            game_server,
            limits,
            config,
            tracker: GameTracker::new(),
        })
    }

    /// Publish in-flight games to `tracker` instead of a private one.
    #[must_use]
    pub fn with_tracker(mut self, tracker: GameTracker) -> Self {
        self.tracker = tracker;
        self
    }

    #[must_use]
    pub fn tracker(&self) -> &GameTracker {
        &self.tracker
    }

    /// Play `game` to a terminal state.
    ///
    /// Returns the game as finished or failed. Only a failure to persist the
    /// `failed` state is returned as an error.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] raised while recording the game as failed.
    pub async fn play(&self, mut game: Game) -> Result<Game, StoreError> {
        game.submissions.sort_by_key(|s| s.id);
        self.tracker.update(&game);

        let mut clients = Vec::with_capacity(game.submissions.len());
        let played = self.try_play(&mut game, &mut clients).await;

        let result = match played {
            Ok(()) => {
                info!(
                    game_id = game.id,
                    winner = game.winner.as_ref().map(|w| w.team.name.as_str()),
                    "game finished"
                );
                Ok(game)
            }
            Err(err) => {
                error!(game_id = game.id, ?game, %err, "game failure");
                self.game_failed(&mut game, &mut clients).await.map(|()| game)
            }
        };

        if let Ok(game) = &result {
            self.tracker.remove(game.id);
        }
        result
    }

    async fn try_play(
        &self,
        game: &mut Game,
        clients: &mut Vec<ContainerClient>,
    ) -> Result<(), PlayError> {
        let game_id = game.id;

        for (index, submission) in game.submissions.iter_mut().enumerate() {
            let file_name = submission.log_file_name();
            submission.output_url = Some(output_url(&self.config.log_url_prefix, &file_name));

            let path = self.config.output_dir.join(&file_name);
            let log = LogSink::open_gzip(path.clone())
                .await
                .map_err(|source| PlayError::LogSink { path, source })?;

            let spec = ContainerSpec::for_submission(
                submission,
                index,
                game_id,
                &self.game_server,
                &self.limits,
            );
            clients.push(ContainerClient::new(
                Arc::clone(&self.engine),
                spec,
                log,
                self.config.orphan_cleanup_delay,
            ));
        }
        self.tracker.update(game);

        try_join_all(clients.iter_mut().map(|client| client.pull()))
            .await
            .inspect_err(|_| error!(game_id, "pull failed"))?;

        game.status = GameStatus::Playing;
        self.tracker.update(game);

        let timeout = self.config.client_timeout;
        try_join_all(clients.iter_mut().map(|client| client.run(timeout)))
            .await
            .inspect_err(|_| error!(game_id, "run failed"))?;

        game.end_time = Some(Utc::now());
        self.store.record_submission_outputs(game).await?;

        let outcome = self.results.game_info(game_id).await?;
        if outcome.losers.is_empty() {
            return Err(PlayError::NoLosers(game_id));
        }

        if let Some(winner) = &outcome.winner {
            game.winner = game.submission_by_team_name(&winner.name).cloned();
            if game.winner.is_none() {
                warn!(game_id, team = %winner.name, "winner matches no submission");
            }
            game.win_reason = winner.reason.clone();
        }
        game.lose_reason = outcome.lose_reason().map(str::to_string);
        game.log_url = Some(outcome.log_location);

        self.store.record_game_finished(game).await?;
        game.status = GameStatus::Finished;
        self.tracker.update(game);
        Ok(())
    }

    /// Stop every client, close every log and persist `failed`.
    ///
    /// Cleanup failures are logged only.
    async fn game_failed(
        &self,
        game: &mut Game,
        clients: &mut [ContainerClient],
    ) -> Result<(), StoreError> {
        let stopped = join_all(clients.iter_mut().map(|client| client.stop())).await;
        let unstopped = stopped.iter().filter(|result| result.is_err()).count();
        if unstopped > 0 {
            error!(game_id = game.id, unstopped, "unable to stop clients");
        }
        for client in clients.iter() {
            client.close_log();
        }

        if let Err(err) = self.store.record_game_failed(game.id).await {
            error!(game_id = game.id, %err, "failed to record failed game");
            self.tracker.remove(game.id);
            return Err(err);
        }
        game.status = GameStatus::Failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Read;
    use std::time::Duration;

    use arena_model::MatchOutcome;
    use arena_store::InMemoryJobStore;
    use flate2::read::GzDecoder;

    use super::*;
    use crate::testing::{FakeEngine, FakeResults, alpha_beta_outcome, submission};

    struct Harness {
        store: Arc<InMemoryJobStore>,
        engine: Arc<FakeEngine>,
        results: Arc<FakeResults>,
        player: Player,
        dir: tempfile::TempDir,
    }

    fn harness(engine: FakeEngine, outcome: Option<MatchOutcome>) -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = Arc::new(engine);
        let results = Arc::new(FakeResults::new(outcome));
        let dir = tempfile::tempdir().unwrap();
        let player = Player::new(
            store.clone(),
            engine.clone(),
            results.clone(),
            GameServerConfig::default(),
            ContainerLimits::default(),
            PlayConfig::new(dir.path()).with_client_timeout(Duration::from_secs(60)),
        )
        .unwrap();
        Harness {
            store,
            engine,
            results,
            player,
            dir,
        }
    }

    async fn claim(store: &InMemoryJobStore, game_id: i64) -> Game {
        store.enqueue(
            game_id,
            vec![submission(2, 20, "Beta"), submission(1, 10, "Alpha")],
        );
        store.claim_next_queued_game().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_plays_game_to_finished() {
        let h = harness(FakeEngine::new(), Some(alpha_beta_outcome()));
        let game = claim(&h.store, 5).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.winner.as_ref().map(|w| w.team.name.as_str()), Some("Alpha"));
        assert_eq!(game.win_reason.as_deref(), Some("checkmate"));
        assert_eq!(game.lose_reason.as_deref(), Some("resignation"));
        assert_eq!(game.log_url.as_deref(), Some("localhost:3080/gamelog/chess-5.json.gz"));
        assert!(game.end_time.is_some());

        let recorded = h.store.finished_game(5).unwrap();
        assert_eq!(recorded.winner.map(|w| w.team.name), Some("Alpha".to_string()));
        assert_eq!(h.store.status(5), Some(GameStatus::Finished));
        assert_eq!(
            h.store.output_url(1).as_deref(),
            Some("/runner/team_10_v1_1.log.gz")
        );
        assert_eq!(h.results.calls(), [5]);
        assert!(h.player.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_player_index_follows_submission_id() {
        let h = harness(FakeEngine::new(), Some(alpha_beta_outcome()));
        let game = claim(&h.store, 5).await;

        h.player.play(game).await.unwrap();

        let specs = h.engine.specs();
        let index_of = |name: &str| {
            specs
                .iter()
                .find(|s| s.container_name == name)
                .map(|s| s.args[7].clone())
        };
        assert_eq!(index_of("team_10_1").as_deref(), Some("0"));
        assert_eq!(index_of("team_20_2").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_logs_are_written_and_closed() {
        let h = harness(FakeEngine::new(), Some(alpha_beta_outcome()));
        let game = claim(&h.store, 5).await;

        h.player.play(game).await.unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(h.dir.path().join("team_10_v1_1.log.gz")).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("hello from team_10_1"));
    }

    #[tokio::test]
    async fn test_failed_pull_fails_game_and_stops_every_client() {
        let h = harness(
            FakeEngine::new().fail_pull("registry.local/Beta"),
            Some(alpha_beta_outcome()),
        );
        let game = claim(&h.store, 8).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Failed);
        assert!(game.winner.is_none());
        assert_eq!(h.store.status(8), Some(GameStatus::Failed));
        assert!(h.engine.runs().is_empty());
        let lookups = h.engine.lookups();
        assert!(lookups.iter().any(|name| name == "team_10_1"));
        assert!(lookups.iter().any(|name| name == "team_20_2"));
        assert!(h.results.calls().is_empty());
    }

    #[tokio::test]
    async fn test_entrypoint_failure_fails_game() {
        let h = harness(FakeEngine::new().exit_code(127), Some(alpha_beta_outcome()));
        let game = claim(&h.store, 9).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Failed);
        assert!(game.winner.is_none());
        assert_eq!(h.store.status(9), Some(GameStatus::Failed));
        assert!(h.store.finished_game(9).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_client_does_not_fail_game() {
        let h = harness(FakeEngine::new().hang(), Some(alpha_beta_outcome()));
        let game = claim(&h.store, 4).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(h.engine.stops().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_outcome_fails_game() {
        let h = harness(FakeEngine::new(), None);
        let game = claim(&h.store, 3).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Failed);
        assert_eq!(h.store.status(3), Some(GameStatus::Failed));
    }

    #[tokio::test]
    async fn test_outcome_without_winner_fails_game() {
        let mut draw = alpha_beta_outcome();
        draw.winner = None;
        let h = harness(FakeEngine::new(), Some(draw));
        let game = claim(&h.store, 6).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Failed);
        assert_eq!(h.store.status(6), Some(GameStatus::Failed));
    }

    #[tokio::test]
    async fn test_outcome_without_losers_fails_game() {
        let mut outcome = alpha_beta_outcome();
        outcome.losers.clear();
        let h = harness(FakeEngine::new(), Some(outcome));
        let game = claim(&h.store, 2).await;

        let game = h.player.play(game).await.unwrap();

        assert_eq!(game.status, GameStatus::Failed);
    }

    #[tokio::test]
    async fn test_unrecorded_failure_propagates() {
        let h = harness(
            FakeEngine::new().fail_pull("registry.local/Alpha"),
            Some(alpha_beta_outcome()),
        );
        let game = claim(&h.store, 1).await;
        h.store.set_unavailable(true);

        let err = h.player.play(game).await.unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(h.player.tracker().is_empty());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let result = Player::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(FakeEngine::new()),
            Arc::new(FakeResults::new(None)),
            GameServerConfig::default(),
            ContainerLimits::default(),
            PlayConfig::new(dir.path()).with_client_timeout(Duration::ZERO),
        );
        assert!(matches!(result, Err(ConfigError::Zero("client_timeout"))));
    }
}
