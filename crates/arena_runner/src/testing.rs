//! Fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use arena_model::{Game, GameId, MatchOutcome, PlayerResult, Submission, Team, TeamId};

use crate::engine::{ContainerEngine, ContainerExit, ContainerInspection, ContainerSpec, PullStream};
use crate::error::{EngineError, GameServerError};
use crate::game_server::MatchResults;
use crate::log_sink::{LogPipe, LogSink, LogWriter};

pub fn submission(id: i64, team_id: TeamId, name: &str) -> Submission {
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

pub fn game(id: GameId) -> Game {
    Game::claimed(
        id,
        vec![submission(1, 10, "Alpha"), submission(2, 20, "Beta")],
    )
    .unwrap()
}

/// Alpha beats Beta by resignation in session 5.
pub fn alpha_beta_outcome() -> MatchOutcome {
    MatchOutcome {
        winner: Some(PlayerResult {
            name: "Alpha".to_string(),
            reason: Some("checkmate".to_string()),
        }),
        losers: vec![PlayerResult {
            name: "Beta".to_string(),
            reason: Some("resignation".to_string()),
        }],
        log_location: "localhost:3080/gamelog/chess-5.json.gz".to_string(),
    }
}

#[derive(Debug, Default)]
struct MemoryLogState {
    bytes: Vec<u8>,
    finished: bool,
}

/// In-memory log destination that can be read back.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    state: Arc<Mutex<MemoryLogState>>,
}

impl MemoryLog {
    pub fn sink() -> (LogSink, MemoryLog) {
        let log = MemoryLog::default();
        (LogSink::new(Box::new(log.clone())), log)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().bytes).into_owned()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }
}

impl Write for MemoryLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().unwrap().bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogWriter for MemoryLog {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.state.lock().unwrap().finished = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EngineCalls {
    pulls: Vec<String>,
    specs: Vec<ContainerSpec>,
    lookups: Vec<String>,
    stops: Vec<String>,
    removals: Vec<String>,
    /// Live containers, name to id.
    containers: HashMap<String, String>,
}

/// Scriptable container engine.
///
/// Containers get the id `id-<name>`. Like auto-removed containers, they
/// disappear once they exit or are stopped.
#[derive(Debug, Default)]
pub struct FakeEngine {
    failing_pulls: HashSet<String>,
    hang: bool,
    exit_code: i64,
    calls: Mutex<EngineCalls>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_pull(mut self, image: &str) -> Self {
        self.failing_pulls.insert(image.to_string());
        self
    }

    /// Containers run until stopped.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    /// Pretend a container named `name` already exists.
    pub fn register(&self, name: &str) {
        self.calls
            .lock()
            .unwrap()
            .containers
            .insert(name.to_string(), format!("id-{name}"));
    }

    pub fn pulls(&self) -> Vec<String> {
        self.calls.lock().unwrap().pulls.clone()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.calls.lock().unwrap().specs.clone()
    }

    /// Names of the containers that were run.
    pub fn runs(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.container_name).collect()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.calls.lock().unwrap().lookups.clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.calls.lock().unwrap().stops.clone()
    }

    pub fn removals(&self) -> Vec<String> {
        self.calls.lock().unwrap().removals.clone()
    }

    fn forget(&self, id: &str) {
        self.calls
            .lock()
            .unwrap()
            .containers
            .retain(|_, live| live != id);
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn pull<'a>(&'a self, image: &'a str) -> PullStream<'a> {
        self.calls.lock().unwrap().pulls.push(image.to_string());
        let mut events = vec![Ok(format!("Pulling {image}\n"))];
        if self.failing_pulls.contains(image) {
            events.push(Err(EngineError::Docker(
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message: format!("pull access denied for {image}"),
                },
            )));
        } else {
            events.push(Ok("Download complete\n".to_string()));
        }
        futures::stream::iter(events).boxed()
    }

    async fn run(&self, spec: &ContainerSpec, output: LogPipe) -> Result<ContainerExit, EngineError> {
        let id = format!("id-{}", spec.container_name);
        {
            let mut calls = self.calls.lock().unwrap();
            calls.specs.push(spec.clone());
            calls.containers.insert(spec.container_name.clone(), id.clone());
        }
        let _ = output.write(format!("hello from {}\n", spec.container_name).as_bytes());

        if self.hang {
            futures::future::pending::<()>().await;
        }
        self.forget(&id);
        Ok(ContainerExit {
            status_code: self.exit_code,
        })
    }

    async fn find_container(&self, name: &str) -> Result<Option<String>, EngineError> {
        let mut calls = self.calls.lock().unwrap();
        calls.lookups.push(name.to_string());
        Ok(calls.containers.get(name).cloned())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, EngineError> {
        let calls = self.calls.lock().unwrap();
        calls
            .containers
            .iter()
            .find(|(_, live)| live.as_str() == id)
            .map(|(name, live)| ContainerInspection {
                id: live.clone(),
                name: name.clone(),
                running: true,
                status: Some("running".to_string()),
                exit_code: None,
            })
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        self.calls.lock().unwrap().stops.push(id.to_string());
        self.forget(id);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.calls.lock().unwrap().removals.push(id.to_string());
        self.forget(id);
        Ok(())
    }
}

/// Game server answering every session with the same outcome, or with
/// [`GameServerError::NoClients`] when none is set.
#[derive(Debug, Default)]
pub struct FakeResults {
    outcome: Option<MatchOutcome>,
    calls: Mutex<Vec<GameId>>,
}

impl FakeResults {
    pub fn new(outcome: Option<MatchOutcome>) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<GameId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MatchResults for FakeResults {
    async fn game_info(&self, session_id: GameId) -> Result<MatchOutcome, GameServerError> {
        self.calls.lock().unwrap().push(session_id);
        self.outcome
            .clone()
            .ok_or(GameServerError::NoClients(session_id))
    }
}
