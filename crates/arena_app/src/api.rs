//! HTTP control surface.
//!
//!   GET /status   games currently being played
//!   GET /start    resume pulling queued games
//!   GET /stop     stop pulling queued games (games in flight play on)

use std::sync::Arc;

use arena_model::Game;
use arena_runner::Runner;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct RunnerState {
    runner: Uuid,
    running: bool,
    /// Whether this request changed the state.
    changed: bool,
    in_flight: usize,
}

impl RunnerState {
    fn of(runner: &Runner, running: bool, changed: bool) -> Self {
        Self {
            runner: runner.id(),
            running,
            changed,
            in_flight: runner.queue().held(),
        }
    }
}

pub fn router(runner: Arc<Runner>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/start", get(start))
        .route("/stop", get(stop))
        .with_state(runner)
}

async fn status(State(runner): State<Arc<Runner>>) -> Json<Vec<Game>> {
    Json(runner.tracker().snapshot())
}

async fn start(State(runner): State<Arc<Runner>>) -> Json<RunnerState> {
    let changed = runner.start().await;
    info!(changed, "start requested");
    Json(RunnerState::of(&runner, true, changed))
}

async fn stop(State(runner): State<Arc<Runner>>) -> Json<RunnerState> {
    let changed = runner.stop().await;
    info!(changed, "stop requested");
    Json(RunnerState::of(&runner, false, changed))
}
