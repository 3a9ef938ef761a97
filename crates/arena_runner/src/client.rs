//! Lifecycle of one submission's container within a game.
//!
//! ```text
//! created -> pulling -> pulled -> running -> completed
//!               |                   |------> timed-out
//!               `-> failed <--------'
//! ```
//!
//! A timeout is not an error: the container is stopped and the game goes
//! on. A failed pull or a failed run is fatal to the game.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::engine::{ContainerEngine, ContainerInspection, ContainerSpec};
use crate::error::{ClientError, EngineError};
use crate::log_sink::{
    FAILED_PULL_MARKER, FAILED_RUN_MARKER, KILLED_MARKER, LogSink, TIMEOUT_REACHED,
};

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Pulling,
    Pulled,
    Running,
    Completed,
    TimedOut,
    Failed,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container exited on its own.
    Completed { exit_code: i64 },
    /// The container was stopped after exceeding its timeout.
    TimedOut,
}

/// Orchestrator-side handle on one submission's container.
pub struct ContainerClient {
    engine: Arc<dyn ContainerEngine>,
    spec: ContainerSpec,
    log: LogSink,
    state: ClientState,
    container_id: Option<String>,
    orphan_cleanup_delay: Duration,
}

impl std::fmt::Debug for ContainerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerClient")
            .field("container", &self.spec.container_name)
            .field("image", &self.spec.image)
            .field("state", &self.state)
            .field("container_id", &self.container_id)
            .finish()
    }
}

impl ContainerClient {
    #[must_use]
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        spec: ContainerSpec,
        log: LogSink,
        orphan_cleanup_delay: Duration,
    ) -> Self {
        Self {
            engine,
            spec,
            log,
            state: ClientState::Created,
            container_id: None,
            orphan_cleanup_delay,
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub fn container_name(&self) -> &str {
        &self.spec.container_name
    }

    #[must_use]
    pub fn image(&self) -> &str {
        &self.spec.image
    }

    /// Engine id of the container, once it has been looked up.
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Pull the submission image, copying progress into the log.
    ///
    /// The log stays open on success. On failure a `FAILED PULL` marker and
    /// the error are written and the log is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Pull`] if the pull stream reports an error.
    pub async fn pull(&mut self) -> Result<(), ClientError> {
        self.state = ClientState::Pulling;
        info!(image = %self.spec.image, container = %self.spec.container_name, "pulling image");

        let engine = Arc::clone(&self.engine);
        let image = self.spec.image.clone();
        let mut progress = engine.pull(&image);
        while let Some(event) = progress.next().await {
            match event {
                Ok(line) => {
                    if let Err(err) = self.log.write(line.as_bytes()) {
                        warn!(container = %self.spec.container_name, %err, "failed to log pull progress");
                    }
                }
                Err(source) => {
                    error!(image = %image, %source, "image pull failed");
                    self.write_marker(FAILED_PULL_MARKER, &source.to_string());
                    self.close_log();
                    self.state = ClientState::Failed;
                    return Err(ClientError::Pull {
                        image: self.spec.image.clone(),
                        source,
                    });
                }
            }
        }

        self.state = ClientState::Pulled;
        debug!(image = %image, "image pulled");
        Ok(())
    }

    /// Run the container until it exits or `timeout` elapses.
    ///
    /// The log is closed on every path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EntrypointFailed`] on exit code 127,
    /// [`ClientError::Run`] if the engine fails, and
    /// [`ClientError::InvalidTimeout`] for a zero timeout.
    pub async fn run(&mut self, timeout: Duration) -> Result<RunOutcome, ClientError> {
        if timeout.is_zero() {
            self.close_log();
            self.state = ClientState::Failed;
            return Err(ClientError::InvalidTimeout);
        }

        self.clear_orphan().await;
        self.state = ClientState::Running;
        info!(
            container = %self.spec.container_name,
            image = %self.spec.image,
            timeout_secs = timeout.as_secs(),
            "running container"
        );

        let engine = Arc::clone(&self.engine);
        let finished = tokio::time::timeout(timeout, engine.run(&self.spec, self.log.pipe())).await;

        let outcome = match finished {
            Ok(Ok(exit)) if exit.entrypoint_failed() => {
                error!(container = %self.spec.container_name, image = %self.spec.image, "entrypoint failed");
                self.write_marker(FAILED_RUN_MARKER, "entrypoint could not be launched");
                self.state = ClientState::Failed;
                Err(ClientError::EntrypointFailed {
                    image: self.spec.image.clone(),
                    container: self.spec.container_name.clone(),
                })
            }
            Ok(Ok(exit)) => {
                info!(container = %self.spec.container_name, exit_code = exit.status_code, "container exited");
                self.state = ClientState::Completed;
                Ok(RunOutcome::Completed {
                    exit_code: exit.status_code,
                })
            }
            Ok(Err(source)) => {
                error!(container = %self.spec.container_name, %source, "container run failed");
                self.write_marker(FAILED_RUN_MARKER, &source.to_string());
                self.state = ClientState::Failed;
                Err(ClientError::Run {
                    container: self.spec.container_name.clone(),
                    source,
                })
            }
            Err(_elapsed) => {
                warn!(container = %self.spec.container_name, "client timeout reached, stopping container");
                self.write_marker(KILLED_MARKER, TIMEOUT_REACHED);
                self.state = ClientState::TimedOut;
                // Already logged by stop; the game continues either way.
                let _ = self.stop().await;
                Ok(RunOutcome::TimedOut)
            }
        };

        self.close_log();
        outcome
    }

    /// Look the container up by its name and inspect it.
    ///
    /// Returns `None` if no such container exists.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Inspect`] if the engine cannot be queried.
    pub async fn inspect_container(&mut self) -> Result<Option<ContainerInspection>, ClientError> {
        let inspect_err = |source| ClientError::Inspect {
            container: self.spec.container_name.clone(),
            source,
        };

        let Some(id) = self
            .engine
            .find_container(&self.spec.container_name)
            .await
            .map_err(inspect_err)?
        else {
            return Ok(None);
        };

        match self.engine.inspect(&id).await {
            Ok(inspection) => {
                self.container_id = Some(inspection.id.clone());
                Ok(Some(inspection))
            }
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(source) => Err(inspect_err(source)),
        }
    }

    /// Stop the container if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Inspect`] or [`ClientError::Stop`]; both are
    /// also logged here.
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        let result = self.try_stop().await;
        if let Err(err) = &result {
            warn!(container = %self.spec.container_name, %err, "failed to stop container");
        }
        result
    }

    async fn try_stop(&mut self) -> Result<(), ClientError> {
        let Some(inspection) = self.inspect_container().await? else {
            debug!(container = %self.spec.container_name, "no container to stop");
            return Ok(());
        };
        info!(container = %self.spec.container_name, id = %inspection.id, "stopping container");
        self.engine
            .stop(&inspection.id)
            .await
            .map_err(|source| ClientError::Stop {
                container: self.spec.container_name.clone(),
                source,
            })
    }

    /// Clear a container left behind under this client's name.
    ///
    /// Best-effort: failures are logged and the run proceeds.
    async fn clear_orphan(&self) {
        let name = &self.spec.container_name;
        let id = match self.engine.find_container(name).await {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(err) => {
                warn!(container = %name, %err, "orphan lookup failed");
                return;
            }
        };

        warn!(container = %name, id = %id, "removing orphaned container");
        if let Err(err) = self.engine.stop(&id).await {
            warn!(container = %name, %err, "failed to stop orphaned container");
        }
        if let Err(err) = self.engine.remove(&id).await {
            warn!(container = %name, %err, "failed to remove orphaned container");
        }
        tokio::time::sleep(self.orphan_cleanup_delay).await;
    }

    fn write_marker(&self, marker: &str, detail: &str) {
        if let Err(err) = self.log.write_marker(marker, detail) {
            warn!(container = %self.spec.container_name, %err, "failed to write log marker");
        }
    }

    /// Close the submission log. Safe to call more than once.
    pub fn close_log(&self) {
        if let Err(err) = self.log.close() {
            warn!(container = %self.spec.container_name, %err, "failed to close log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContainerLimits, GameServerConfig};
    use crate::testing::{FakeEngine, MemoryLog, submission};

    fn client(engine: &Arc<FakeEngine>) -> (ContainerClient, MemoryLog) {
        let spec = ContainerSpec::for_submission(
            &submission(99, 7, "Alpha"),
            0,
            123,
            &GameServerConfig::default(),
            &ContainerLimits::default(),
        );
        let (sink, log) = MemoryLog::sink();
        let engine: Arc<dyn ContainerEngine> = engine.clone();
        (ContainerClient::new(engine, spec, sink, Duration::from_secs(1)), log)
    }

    #[tokio::test]
    async fn test_pull_writes_progress_and_keeps_log_open() {
        let engine = Arc::new(FakeEngine::new());
        let (mut client, log) = client(&engine);

        client.pull().await.unwrap();

        assert_eq!(client.state(), ClientState::Pulled);
        assert_eq!(engine.pulls(), ["registry.local/Alpha"]);
        assert!(log.text().contains("Pulling"));
        assert!(!log.is_finished());
    }

    #[tokio::test]
    async fn test_failed_pull_marks_and_closes_log() {
        let engine = Arc::new(FakeEngine::new().fail_pull("registry.local/Alpha"));
        let (mut client, log) = client(&engine);

        let err = client.pull().await.unwrap_err();

        assert!(matches!(err, ClientError::Pull { ref image, .. } if image == "registry.local/Alpha"));
        assert_eq!(client.state(), ClientState::Failed);
        assert!(log.text().contains(FAILED_PULL_MARKER));
        assert!(log.is_finished());
    }

    #[tokio::test]
    async fn test_run_completes() {
        let engine = Arc::new(FakeEngine::new());
        let (mut client, log) = client(&engine);

        let outcome = client.run(Duration::from_secs(60)).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed { exit_code: 0 });
        assert_eq!(client.state(), ClientState::Completed);
        assert!(log.text().contains("hello from team_7_99"));
        assert!(log.is_finished());
        assert!(engine.stops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_container_once() {
        let engine = Arc::new(FakeEngine::new().hang());
        let (mut client, log) = client(&engine);

        let outcome = client.run(Duration::from_secs(300)).await.unwrap();

        assert_eq!(outcome, RunOutcome::TimedOut);
        assert_eq!(client.state(), ClientState::TimedOut);
        assert!(log.text().contains(TIMEOUT_REACHED));
        assert!(log.is_finished());
        assert_eq!(engine.stops(), ["id-team_7_99"]);
    }

    #[tokio::test]
    async fn test_entrypoint_failure_names_image() {
        let engine = Arc::new(FakeEngine::new().exit_code(127));
        let (mut client, log) = client(&engine);

        let err = client.run(Duration::from_secs(60)).await.unwrap_err();

        assert!(err.to_string().contains("registry.local/Alpha"));
        assert_eq!(client.state(), ClientState::Failed);
        assert!(log.text().contains(FAILED_RUN_MARKER));
        assert!(log.is_finished());
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected() {
        let engine = Arc::new(FakeEngine::new());
        let (mut client, log) = client(&engine);

        let err = client.run(Duration::ZERO).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidTimeout));
        assert!(engine.runs().is_empty());
        assert!(log.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_is_cleared_before_run() {
        let engine = Arc::new(FakeEngine::new());
        engine.register("team_7_99");
        let (mut client, _log) = client(&engine);

        client.run(Duration::from_secs(60)).await.unwrap();

        assert_eq!(engine.stops(), ["id-team_7_99"]);
        assert_eq!(engine.removals(), ["id-team_7_99"]);
        assert_eq!(engine.runs(), ["team_7_99"]);
    }

    #[tokio::test]
    async fn test_stop_without_container_is_noop() {
        let engine = Arc::new(FakeEngine::new());
        let (mut client, _log) = client(&engine);

        client.stop().await.unwrap();

        assert!(client.inspect_container().await.unwrap().is_none());
        assert!(engine.stops().is_empty());
    }
}
