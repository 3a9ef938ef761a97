//! Container engine seam.
//!
//! [`ContainerEngine`] is the narrow surface the runner needs from a
//! container daemon. [`DockerEngine`](crate::docker::DockerEngine) implements
//! it over the Docker API; tests use an in-process fake.

use async_trait::async_trait;
use futures::stream::BoxStream;

use arena_model::{GameId, Submission};

use crate::config::{ContainerLimits, GameServerConfig};
use crate::error::EngineError;
use crate::log_sink::LogPipe;

/// Image pull progress, one line of text per event.
pub type PullStream<'a> = BoxStream<'a, Result<String, EngineError>>;

/// Everything needed to create one client container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub container_name: String,
    /// Arguments appended to the image entrypoint.
    pub args: Vec<String>,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub memory: i64,
    pub memory_swap: i64,
    pub network_mode: String,
    pub user: String,
    /// Remove the container as soon as it exits.
    pub auto_remove: bool,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub stop_timeout_secs: i64,
}

impl ContainerSpec {
    /// The spec for one submission's client in `game_id`.
    ///
    /// The client is told its team name, where the game server listens, the
    /// session to join, its player index and the game being played.
    #[must_use]
    pub fn for_submission(
        submission: &Submission,
        player_index: usize,
        game_id: GameId,
        server: &GameServerConfig,
        limits: &ContainerLimits,
    ) -> Self {
        let args = vec![
            "-n".to_string(),
            submission.team.name.clone(),
            "-s".to_string(),
            server.game_address(),
            "-r".to_string(),
            game_id.to_string(),
            "-i".to_string(),
            player_index.to_string(),
            server.game_name.clone(),
        ];
        Self {
            image: submission.image.clone(),
            container_name: submission.container_name(),
            args,
            cpu_period: limits.cpu_period,
            cpu_quota: limits.cpu_quota,
            memory: limits.memory,
            memory_swap: limits.memory_swap,
            network_mode: limits.network_mode.clone(),
            user: limits.user.clone(),
            auto_remove: true,
            stop_timeout_secs: limits.stop_timeout_secs,
        }
    }
}

/// How a container ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExit {
    pub status_code: i64,
}

impl ContainerExit {
    /// Exit code a shell reports when the command cannot be found.
    pub const ENTRYPOINT_NOT_FOUND: i64 = 127;

    /// Returns `true` if the entrypoint never started.
    #[must_use]
    pub fn entrypoint_failed(&self) -> bool {
        self.status_code == Self::ENTRYPOINT_NOT_FOUND
    }
}

/// The parts of a container inspection the runner cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspection {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub status: Option<String>,
    pub exit_code: Option<i64>,
}

/// Operations the runner performs against a container daemon.
///
/// Implementations are shared by every client of every game, so they must be
/// safe for concurrent use.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pull `image`, yielding progress lines until the pull completes.
    fn pull<'a>(&'a self, image: &'a str) -> PullStream<'a>;

    /// Create and start a container, stream its combined output into `output`,
    /// and wait for it to exit.
    async fn run(&self, spec: &ContainerSpec, output: LogPipe) -> Result<ContainerExit, EngineError>;

    /// Find a container by exact name, returning its id.
    async fn find_container(&self, name: &str) -> Result<Option<String>, EngineError>;

    /// Inspect a container by id.
    ///
    /// Returns [`EngineError::NotFound`] if it does not exist.
    async fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError>;

    /// Stop a container. Stopping an absent or stopped container succeeds.
    async fn stop(&self, id: &str) -> Result<(), EngineError>;

    /// Force-remove a container. Removing an absent container succeeds.
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
}
