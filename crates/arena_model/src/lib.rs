//! # arena_model
//!
//! Data model shared by the arena match runner crates.
//!
//! This crate provides:
//!
//! - [`game`]: games, submissions, teams and the game status lifecycle.
//! - [`outcome`]: the match outcome reported by the game server.
//! - [`naming`]: deterministic container and log file names.

pub mod game;
pub mod naming;
pub mod outcome;

pub use game::{Game, GameId, GameStatus, ModelError, Submission, SubmissionId, Team, TeamId};
pub use outcome::{MatchOutcome, PlayerResult};
