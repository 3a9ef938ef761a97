//! # arena_runner
//!
//! Runs queued games: claims them from the job store under admission
//! control, starts one container per submission, waits for the game server's
//! verdict and records the outcome.
//!
//! ```text
//! Runner ──> GameQueue ──claim──> JobStore
//!   │
//!   └─spawn─> Player ──> ContainerClient ──> ContainerEngine (Docker)
//!                │
//!                └──> MatchResults (game server) ──> JobStore
//! ```
//!
//! - [`queue`]: admission-controlled stream of claimed games.
//! - [`runner`]: start/stop control loop dispatching games to the player.
//! - [`player`]: one game from image pull to persisted outcome.
//! - [`client`]: lifecycle of one submission's container.
//! - [`engine`] / [`docker`]: container engine seam and its Docker backend.
//! - [`game_server`]: game server status API and outcome parsing.
//! - [`log_sink`]: gzip submission logs.
//! - [`tracker`]: in-flight games for status reporting.
//! - [`config`] / [`error`]: configuration and error types.

pub mod client;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod game_server;
pub mod log_sink;
pub mod player;
pub mod queue;
pub mod runner;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use client::{ClientState, ContainerClient, RunOutcome};
pub use config::{AdmissionConfig, ConfigError, ContainerLimits, GameServerConfig, PlayConfig};
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerExit, ContainerInspection, ContainerSpec};
pub use error::{ClientError, EngineError, GameServerError, PlayError};
pub use game_server::{GameServerClient, GameServerStatus, MatchResults};
pub use log_sink::{LogPipe, LogSink};
pub use player::Player;
pub use queue::GameQueue;
pub use runner::Runner;
pub use tracker::GameTracker;
