//! Games, submissions and teams.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::naming;

/// Identifier of a game (also used as the game server session id).
pub type GameId = i64;

/// Identifier of a submission within a game.
pub type SubmissionId = i64;

/// Identifier of a team.
pub type TeamId = i64;

/// Errors raised when building model values from claimed data.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A game was claimed with fewer submissions than a match needs.
    #[error("game {game_id} has {count} submissions, at least {min} are required", min = Game::MIN_SUBMISSIONS)]
    NotEnoughSubmissions {
        /// The claimed game.
        game_id: GameId,
        /// How many submissions it had.
        count: usize,
    },
}

/// Lifecycle of a game: `queued → playing → {finished, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Waiting in the job store.
    Queued,
    /// Claimed by a runner and being played.
    Playing,
    /// Played to completion with a recorded outcome.
    Finished,
    /// Aborted; the outcome is unknown.
    Failed,
}

impl GameStatus {
    /// The status as stored in the job store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Playing => "playing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `finished` and `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A competing team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

/// One team's entry in a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub team: Team,
    /// Container image reference, pulled as-is.
    pub image: String,
    pub version: i64,
    /// Public location of this submission's log, assigned before any container runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
}

impl Submission {
    /// The deterministic container name, see [`naming::container_name`].
    #[must_use]
    pub fn container_name(&self) -> String {
        naming::container_name(self.team.id, self.id)
    }

    /// The deterministic log file name, see [`naming::log_file_name`].
    #[must_use]
    pub fn log_file_name(&self) -> String {
        naming::log_file_name(self.team.id, self.version, self.id)
    }
}

/// A scheduled match between two or more submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub submissions: Vec<Submission>,
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Submission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lose_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Game {
    /// Fewest submissions a playable game may have.
    pub const MIN_SUBMISSIONS: usize = 2;

    /// Build a freshly claimed game.
    ///
    /// The game starts in [`GameStatus::Playing`], the status the job store
    /// assigns atomically when claiming.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotEnoughSubmissions`] when fewer than
    /// [`Game::MIN_SUBMISSIONS`] submissions are given.
    pub fn claimed(id: GameId, submissions: Vec<Submission>) -> Result<Self, ModelError> {
        if submissions.len() < Self::MIN_SUBMISSIONS {
            return Err(ModelError::NotEnoughSubmissions {
                game_id: id,
                count: submissions.len(),
            });
        }
        Ok(Self {
            id,
            submissions,
            status: GameStatus::Playing,
            winner: None,
            win_reason: None,
            lose_reason: None,
            log_url: None,
            start_time: Utc::now(),
            end_time: None,
        })
    }

    /// Find the submission entered by the team with the given name.
    #[must_use]
    pub fn submission_by_team_name(&self, name: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.team.name == name)
    }

    /// Returns `true` if the game has enough submissions to be played.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.submissions.len() >= Self::MIN_SUBMISSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(id: SubmissionId, team_id: TeamId, name: &str) -> Submission {
        Submission {
            id,
            team: Team {
                id: team_id,
                name: name.to_string(),
            },
            image: format!("registry.local/{name}"),
            version: 1,
            output_url: None,
        }
    }

    #[test]
    fn test_claimed_game_is_playing() {
        let game = Game::claimed(1, vec![submission(1, 1, "a"), submission(2, 2, "b")]).unwrap();
        assert_eq!(game.status, GameStatus::Playing);
        assert!(game.is_playable());
        assert!(game.winner.is_none());
        assert!(game.end_time.is_none());
    }

    #[test]
    fn test_claimed_game_needs_two_submissions() {
        let err = Game::claimed(9, vec![submission(1, 1, "a")]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::NotEnoughSubmissions {
                game_id: 9,
                count: 1
            }
        ));
    }

    #[test]
    fn test_submission_by_team_name() {
        let game =
            Game::claimed(1, vec![submission(1, 1, "Alpha"), submission(2, 2, "Beta")]).unwrap();
        assert_eq!(game.submission_by_team_name("Beta").map(|s| s.id), Some(2));
        assert!(game.submission_by_team_name("Gamma").is_none());
    }

    #[test]
    fn test_container_name_from_submission() {
        let sub = submission(99, 7, "x");
        assert_eq!(sub.container_name(), "team_7_99");
    }

    #[test]
    fn test_status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&GameStatus::Finished).unwrap(),
            "\"finished\""
        );
        assert!(GameStatus::Failed.is_terminal());
        assert!(!GameStatus::Playing.is_terminal());
    }
}
