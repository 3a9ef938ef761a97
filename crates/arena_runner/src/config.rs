//! Runner configuration.
//!
//! One struct per component, each with documented defaults and a
//! `validate` step run by the component that consumes it.

use std::path::PathBuf;
use std::time::Duration;

use arena_model::naming::DEFAULT_LOG_URL_PREFIX;

/// Configuration values rejected at construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// The memory+swap cap was set below the memory cap.
    #[error("memory swap limit ({swap}) must not be below the memory limit ({memory})")]
    SwapBelowMemory {
        /// Memory cap in bytes.
        memory: i64,
        /// Memory plus swap cap in bytes.
        swap: i64,
    },
}

/// Admission control for the game queue.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Maximum number of games played at once.
    pub queue_limit: usize,
    /// Delay between two claim attempts.
    pub poll_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            queue_limit: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl AdmissionConfig {
    /// Create a validated admission config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] if either value is zero.
    pub fn new(queue_limit: usize, poll_interval: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            queue_limit,
            poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants of this config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] if either value is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_limit == 0 {
            return Err(ConfigError::Zero("queue_limit"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll_interval"));
        }
        Ok(())
    }
}

/// Resource limits and identity applied to every client container.
#[derive(Debug, Clone)]
pub struct ContainerLimits {
    /// CFS scheduler period, in microseconds.
    pub cpu_period: i64,
    /// CFS quota per period, in microseconds.
    pub cpu_quota: i64,
    /// Memory cap in bytes.
    pub memory: i64,
    /// Memory plus swap cap in bytes (equal to `memory` disables swap).
    pub memory_swap: i64,
    /// Docker network the clients join (the game server's network).
    pub network_mode: String,
    /// Effective user inside the container.
    pub user: String,
    /// Seconds the engine waits after SIGTERM before killing.
    pub stop_timeout_secs: i64,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            cpu_period: 100_000,
            cpu_quota: 100_000,
            memory: 512 * 1024 * 1024,
            memory_swap: 512 * 1024 * 1024,
            network_mode: "bridge".to_string(),
            user: "nobody".to_string(),
            stop_timeout_secs: 0,
        }
    }
}

impl ContainerLimits {
    /// Check the invariants of these limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for non-positive caps or swap below memory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_period <= 0 {
            return Err(ConfigError::Zero("cpu_period"));
        }
        if self.cpu_quota <= 0 {
            return Err(ConfigError::Zero("cpu_quota"));
        }
        if self.memory <= 0 {
            return Err(ConfigError::Zero("memory"));
        }
        if self.memory_swap < self.memory {
            return Err(ConfigError::SwapBelowMemory {
                memory: self.memory,
                swap: self.memory_swap,
            });
        }
        Ok(())
    }
}

/// Network identity of the game server.
#[derive(Debug, Clone)]
pub struct GameServerConfig {
    /// Host name clients and the runner use to reach the game server.
    pub hostname: String,
    /// Port clients play on.
    pub game_port: u16,
    /// Port of the status HTTP API.
    pub api_port: u16,
    /// Name of the game being played (e.g. `"chess"`).
    pub game_name: String,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            game_port: 3000,
            api_port: 3080,
            game_name: "chess".to_string(),
        }
    }
}

impl GameServerConfig {
    /// Base URL of the status API.
    ///
    /// `http://<hostname>:<api_port>`
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("http://{}:{}", self.hostname, self.api_port)
    }

    /// Address clients are told to connect to.
    ///
    /// `<hostname>:<game_port>`
    #[must_use]
    pub fn game_address(&self) -> String {
        format!("{}:{}", self.hostname, self.game_port)
    }

    /// Served location of a game log file reported by the game server.
    ///
    /// `<hostname>:<api_port>/gamelog/<file_name>`
    #[must_use]
    pub fn gamelog_location(&self, file_name: &str) -> String {
        format!("{}:{}/gamelog/{file_name}", self.hostname, self.api_port)
    }
}

/// Per-game behaviour of the player.
#[derive(Debug, Clone)]
pub struct PlayConfig {
    /// Wall-clock budget of each client container.
    pub client_timeout: Duration,
    /// Directory the gzip submission logs are written to.
    pub output_dir: PathBuf,
    /// Public prefix the output directory is served under.
    pub log_url_prefix: String,
    /// Pause after clearing an orphaned container before reusing its name.
    pub orphan_cleanup_delay: Duration,
}

impl PlayConfig {
    /// Create a play config writing logs to `output_dir`, with defaults:
    /// a 5 minute client timeout, logs served under `/runner`, and a 1 second
    /// orphan cleanup delay.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client_timeout: Duration::from_secs(5 * 60),
            output_dir: output_dir.into(),
            log_url_prefix: DEFAULT_LOG_URL_PREFIX.to_string(),
            orphan_cleanup_delay: Duration::from_secs(1),
        }
    }

    /// Override the client timeout.
    #[must_use]
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Override the public log prefix.
    #[must_use]
    pub fn with_log_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_url_prefix = prefix.into();
        self
    }

    /// Override the orphan cleanup delay.
    #[must_use]
    pub fn with_orphan_cleanup_delay(mut self, delay: Duration) -> Self {
        self.orphan_cleanup_delay = delay;
        self
    }

    /// Check the invariants of this config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for a zero client timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_timeout.is_zero() {
            return Err(ConfigError::Zero("client_timeout"));
        }
        Ok(())
    }
}
