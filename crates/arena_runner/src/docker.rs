//! [`ContainerEngine`] over the Docker API.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::engine::{ContainerEngine, ContainerExit, ContainerInspection, ContainerSpec, PullStream};
use crate::error::EngineError;
use crate::log_sink::LogPipe;

/// Docker daemon handle shared by every client.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

/// `true` for "no such container" and "already stopped" answers.
fn is_absent_or_idle(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }
    )
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl DockerEngine {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Docker`] if the client cannot be configured.
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        info!("docker client configured");
        Ok(Self { docker })
    }

    /// Wrap an existing bollard client.
    #[must_use]
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    fn create_config(spec: &ContainerSpec) -> Config<String> {
        let host_config = HostConfig {
            cpu_period: Some(spec.cpu_period),
            cpu_quota: Some(spec.cpu_quota),
            memory: Some(spec.memory),
            memory_swap: Some(spec.memory_swap),
            network_mode: Some(spec.network_mode.clone()),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };
        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.args.clone()),
            user: Some(spec.user.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            stop_timeout: Some(spec.stop_timeout_secs),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Wait for the next exit of `id`.
    ///
    /// The daemon reports non-zero exits as errors carrying the code.
    async fn wait_exit(&self, id: &str) -> Result<ContainerExit, EngineError> {
        let options = WaitContainerOptions {
            condition: "next-exit",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(ContainerExit {
                status_code: response.status_code,
            }),
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => {
                Ok(ContainerExit { status_code: code })
            }
            Some(Err(err)) if is_not_found(&err) => Err(EngineError::MissingExitStatus(id.to_string())),
            Some(Err(err)) => Err(err.into()),
            None => Err(EngineError::MissingExitStatus(id.to_string())),
        }
    }

    /// Start `id` and copy its attached output into `output` until it closes.
    async fn start_and_pump(
        &self,
        id: &str,
        name: &str,
        output: LogPipe,
    ) -> Result<(), EngineError> {
        let options = AttachContainerOptions::<String> {
            stream: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let mut attached = self.docker.attach_container(id, Some(options)).await?;

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        debug!(container = name, "container started");

        while let Some(chunk) = attached.output.next().await {
            match chunk {
                Ok(log) => {
                    if let Err(err) = output.write(&log.into_bytes()) {
                        debug!(container = name, %err, "log closed, dropping container output");
                        break;
                    }
                }
                Err(err) => {
                    warn!(container = name, %err, "container output stream failed");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn pull<'a>(&'a self, image: &'a str) -> PullStream<'a> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .map_err(EngineError::from)
            .map(|event| {
                event.map(|info| {
                    let mut line = serde_json::to_string(&info).unwrap_or_default();
                    line.push('\n');
                    line
                })
            })
            .boxed()
    }

    async fn run(&self, spec: &ContainerSpec, output: LogPipe) -> Result<ContainerExit, EngineError> {
        let options = CreateContainerOptions {
            name: spec.container_name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), Self::create_config(spec))
            .await?;
        for warning in &created.warnings {
            warn!(container = %spec.container_name, warning = %warning, "docker create warning");
        }
        debug!(container = %spec.container_name, id = %created.id, "container created");

        // The wait is polled ahead of the start, so its request normally
        // reaches the daemon first. A container that exits and is removed
        // before the daemon registers the wait yields MissingExitStatus.
        let wait = self.wait_exit(&created.id);
        let pump = self.start_and_pump(&created.id, &spec.container_name, output);
        tokio::pin!(wait, pump);

        // A container that never started never exits, so a failed attach or
        // start must not wait for the exit.
        let result = tokio::select! {
            biased;
            exit = &mut wait => match exit {
                Ok(exit) => pump.await.map(|()| exit),
                Err(err) => Err(err),
            },
            pumped = &mut pump => match pumped {
                Ok(()) => wait.await,
                Err(err) => Err(err),
            },
        };

        if let Err(err) = &result {
            warn!(container = %spec.container_name, %err, "container run failed, discarding container");
            if let Err(err) = self.remove(&created.id).await {
                warn!(container = %spec.container_name, %err, "cannot remove failed container");
            }
        }
        result
    }

    async fn find_container(&self, name: &str) -> Result<Option<String>, EngineError> {
        let exact = format!("/{name}");
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![exact.clone()]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .find(|c| c.names.as_ref().is_some_and(|names| names.contains(&exact)))
            .and_then(|c| c.id))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|err| {
                if is_not_found(&err) {
                    EngineError::NotFound(id.to_string())
                } else {
                    err.into()
                }
            })?;
        let state = response.state.unwrap_or_default();
        Ok(ContainerInspection {
            id: response.id.unwrap_or_else(|| id.to_string()),
            name: response
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            running: state.running.unwrap_or(false),
            status: state.status.map(|s| s.to_string()),
            exit_code: state.exit_code,
        })
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: 0 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if is_absent_or_idle(&err) => {
                debug!(id, "container already stopped or gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(err) if is_absent_or_idle(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
