//! Game server status API.
//!
//! The game server hosts every session and decides its outcome. After the
//! clients of a game have run, the player asks it who won:
//!
//! ```text
//! GET http://<hostname>:<api_port>/status/<game_name>/<session_id>
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use arena_model::{GameId, MatchOutcome, PlayerResult};

use crate::config::GameServerConfig;
use crate::error::GameServerError;

/// Upper bound on a single status request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a session on the game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Empty,
    Open,
    Running,
    Over,
    Error,
}

/// One client connected to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClient {
    pub name: String,
    #[serde(default)]
    pub spectating: bool,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub won: Option<bool>,
    #[serde(default)]
    pub lost: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub disconnected: Option<bool>,
    #[serde(default)]
    pub timed_out: Option<bool>,
}

/// Body of a status answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameServerStatus {
    pub status: SessionStatus,
    #[serde(default)]
    pub game_name: String,
    /// Echoed session id; some servers send it as a string.
    #[serde(default)]
    pub game_session: serde_json::Value,
    #[serde(default)]
    pub gamelog_filename: String,
    #[serde(default)]
    pub number_of_players: u32,
    #[serde(default)]
    pub clients: Vec<SessionClient>,
}

/// Source of match outcomes.
#[async_trait]
pub trait MatchResults: Send + Sync {
    /// The outcome of session `session_id`.
    async fn game_info(&self, session_id: GameId) -> Result<MatchOutcome, GameServerError>;
}

/// Convert a raw status into an outcome.
///
/// The client that reports `won` is the winner; every other player, but no
/// spectator, is a loser. The log file name is rewritten to where the game
/// server serves it.
///
/// # Errors
///
/// Returns [`GameServerError::NoClients`] if the session has no clients.
pub fn outcome_from_status(
    session_id: GameId,
    status: GameServerStatus,
    config: &GameServerConfig,
) -> Result<MatchOutcome, GameServerError> {
    if status.clients.is_empty() {
        return Err(GameServerError::NoClients(session_id));
    }

    let mut winner = None;
    let mut losers = Vec::new();
    for client in status.clients {
        let result = PlayerResult {
            name: client.name,
            reason: client.reason,
        };
        if winner.is_none() && client.won == Some(true) {
            winner = Some(result);
        } else if !client.spectating {
            losers.push(result);
        }
    }

    Ok(MatchOutcome {
        winner,
        losers,
        log_location: config.gamelog_location(&status.gamelog_filename),
    })
}

/// HTTP client of the status API.
#[derive(Debug, Clone)]
pub struct GameServerClient {
    http: reqwest::Client,
    config: GameServerConfig,
}

impl GameServerClient {
    /// Build a client for the configured game server.
    ///
    /// # Errors
    ///
    /// Returns [`GameServerError::Http`] if the HTTP client cannot be built.
    pub fn new(config: GameServerConfig) -> Result<Self, GameServerError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &GameServerConfig {
        &self.config
    }

    /// URL of the status of `session_id`.
    #[must_use]
    pub fn status_url(&self, session_id: GameId) -> String {
        format!(
            "{}/status/{}/{session_id}",
            self.config.api_base(),
            self.config.game_name
        )
    }

    /// Fetch the raw status of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`GameServerError`] on transport failure, a non-2xx answer or
    /// an undecodable body.
    pub async fn status(&self, session_id: GameId) -> Result<GameServerStatus, GameServerError> {
        let url = self.status_url(session_id);
        debug!(url = %url, "querying game server");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GameServerError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Check that the status API answers.
    ///
    /// # Errors
    ///
    /// Returns [`GameServerError`] unless the API root answers 200.
    pub async fn ping(&self) -> Result<(), GameServerError> {
        let url = self.config.api_base();
        let response = self.http.get(&url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(GameServerError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Ping until the game server answers, at most `attempts` times,
    /// sleeping `interval` after each failure.
    ///
    /// # Errors
    ///
    /// Returns the last ping error once every attempt has failed.
    pub async fn wait_until_ready(
        &self,
        attempts: u32,
        interval: Duration,
    ) -> Result<(), GameServerError> {
        let mut attempt = 1;
        loop {
            match self.ping().await {
                Ok(()) => {
                    info!(url = %self.config.api_base(), attempt, "game server is up");
                    return Ok(());
                }
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    warn!(attempt, attempts, %err, "game server not ready, retrying");
                    tokio::time::sleep(interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl MatchResults for GameServerClient {
    async fn game_info(&self, session_id: GameId) -> Result<MatchOutcome, GameServerError> {
        let status = self.status(session_id).await.inspect_err(|err| {
            warn!(session_id, %err, "failed to query game outcome");
        })?;
        outcome_from_status(session_id, status, &self.config)
    }
}
