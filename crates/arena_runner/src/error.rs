//! Runner error types.

use std::path::PathBuf;

use arena_model::GameId;
use arena_store::StoreError;

/// Errors reported by a container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// The container does not exist (never created or already removed).
    #[error("container {0} not found")]
    NotFound(String),

    /// The container exited without the engine reporting an exit status.
    #[error("container {0} exited without an exit status")]
    MissingExitStatus(String),
}

/// Errors raised by a [`ContainerClient`](crate::client::ContainerClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The image could not be pulled.
    #[error("failed to pull {image}: {source}")]
    Pull {
        /// Image reference.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// The container could not be created, started or awaited.
    #[error("failed to run {container}: {source}")]
    Run {
        /// Container name.
        container: String,
        /// Engine failure.
        source: EngineError,
    },

    /// The container's entrypoint could not be launched (exit code 127).
    #[error("entrypoint of image {image} could not be launched in {container}")]
    EntrypointFailed {
        /// Image reference.
        image: String,
        /// Container name.
        container: String,
    },

    /// The container could not be looked up.
    #[error("failed to inspect {container}: {source}")]
    Inspect {
        /// Container name.
        container: String,
        /// Engine failure.
        source: EngineError,
    },

    /// The container could not be stopped.
    #[error("failed to stop {container}: {source}")]
    Stop {
        /// Container name.
        container: String,
        /// Engine failure.
        source: EngineError,
    },

    /// A run was requested with a zero timeout.
    #[error("client timeout must be greater than zero")]
    InvalidTimeout,
}

/// Errors raised while querying the game server.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Transport failure or undecodable body.
    #[error("game server request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer.
    #[error("game server answered {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The session reported no clients at all.
    #[error("game server reported no clients for session {0}")]
    NoClients(GameId),
}

/// Reasons a game is aborted by the player.
#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    /// A submission log file could not be created.
    #[error("failed to open log {path}: {source}")]
    LogSink {
        /// Log file path.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// A client failed to pull or run.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The outcome could not be collected.
    #[error(transparent)]
    GameServer(#[from] GameServerError),

    /// The outcome had no losing client.
    #[error("game server reported no losing client for game {0}")]
    NoLosers(GameId),

    /// A job store write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
