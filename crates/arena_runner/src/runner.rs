//! The control loop: drain the game queue into the player.
//!
//! `start` spawns an intake task that claims games and dispatches each one to
//! its own task. `stop` halts the intake only; games already dispatched play
//! on to completion.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::player::Player;
use crate::queue::GameQueue;
use crate::tracker::GameTracker;

struct Intake {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Intake {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Releases an admission slot when the game holding it is done, even if its
/// task panics.
struct HeldSlot(Arc<GameQueue>);

impl Drop for HeldSlot {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub struct Runner {
    id: Uuid,
    queue: Arc<GameQueue>,
    player: Arc<Player>,
    intake: Mutex<Option<Intake>>,
}

impl Runner {
    #[must_use]
    pub fn new(queue: GameQueue, player: Player) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: Arc::new(queue),
            player: Arc::new(player),
            intake: Mutex::new(None),
        }
    }

    /// Identifier of this runner instance, for logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn queue(&self) -> &GameQueue {
        &self.queue
    }

    #[must_use]
    pub fn tracker(&self) -> &GameTracker {
        self.player.tracker()
    }

    /// Start pulling queued games. Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut intake = self.intake.lock().await;
        if intake.as_ref().is_some_and(Intake::is_running) {
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(pull_games(
            self.id,
            Arc::clone(&self.queue),
            Arc::clone(&self.player),
            stop_rx,
        ));
        *intake = Some(Intake { stop, handle });
        info!(runner = %self.id, "runner started");
        true
    }

    /// Stop pulling queued games and wait for the intake to exit.
    ///
    /// Games already dispatched are not awaited. Returns `false` if the
    /// runner was not running.
    pub async fn stop(&self) -> bool {
        let Some(intake) = self.intake.lock().await.take() else {
            return false;
        };
        let _ = intake.stop.send(true);
        if let Err(err) = intake.handle.await {
            error!(runner = %self.id, %err, "intake task failed");
        }
        info!(runner = %self.id, in_flight = self.queue.held(), "runner stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.intake
            .lock()
            .await
            .as_ref()
            .is_some_and(Intake::is_running)
    }
}

async fn pull_games(
    runner: Uuid,
    queue: Arc<GameQueue>,
    player: Arc<Player>,
    mut stop: watch::Receiver<bool>,
) {
    info!(%runner, "pulling queued games");
    while let Some(game) = queue.next_until(&mut stop).await {
        queue.hold();
        info!(%runner, game_id = game.id, status = %game.status, "dispatching game");

        let slot = HeldSlot(Arc::clone(&queue));
        let player = Arc::clone(&player);
        tokio::spawn(async move {
            let _slot = slot;
            let game_id = game.id;
            match player.play(game).await {
                Ok(game) => info!(game_id, status = %game.status, "game over"),
                Err(err) => error!(game_id, %err, "game could not be recorded as failed"),
            }
        });

        if *stop.borrow() {
            break;
        }
    }
    info!(%runner, "stopped pulling queued games");
}
