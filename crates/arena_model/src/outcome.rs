//! Match outcome as reported by the game server.

use serde::{Deserialize, Serialize};

/// One player's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    /// Team name the client connected with.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The result of one game session. Never persisted on its own; it is folded
/// into the [`Game`](crate::Game) it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// The client that reported `won`, if any.
    pub winner: Option<PlayerResult>,
    /// Every other playing client.
    pub losers: Vec<PlayerResult>,
    /// Where the game log is served.
    pub log_location: String,
}

impl MatchOutcome {
    /// The reason reported by the first losing client.
    #[must_use]
    pub fn lose_reason(&self) -> Option<&str> {
        self.losers.first().and_then(|l| l.reason.as_deref())
    }
}
