mod api;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arena_model::naming::DEFAULT_LOG_URL_PREFIX;
use arena_runner::{
    AdmissionConfig, ContainerLimits, DockerEngine, GameQueue, GameServerClient, GameServerConfig,
    PlayConfig, Player, Runner,
};
use arena_store::postgres::DEFAULT_MAX_CONNECTIONS;
use arena_store::{JobStore, PgConnectOptions, PgJobStore};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "arena-runner", about = "Plays queued arena games in containers")]
struct Args {
    /// Postgres URL, overrides the POSTGRES_* settings
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    postgres_port: u16,

    #[arg(long, env = "POSTGRES_USER", default_value = "postgres")]
    postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "postgres", hide_env_values = true)]
    postgres_password: String,

    #[arg(long, env = "POSTGRES_DB", default_value = "postgres")]
    postgres_db: String,

    #[arg(long, env = "POSTGRES_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    postgres_max_connections: u32,

    /// Host name of the game server, as seen by the runner and the clients
    #[arg(long, env = "GAME_SERVER_HOST", default_value = "localhost")]
    game_server_host: String,

    #[arg(long, env = "GAME_SERVER_GAME_PORT", default_value_t = 3000)]
    game_server_game_port: u16,

    #[arg(long, env = "GAME_SERVER_API_PORT", default_value_t = 3080)]
    game_server_api_port: u16,

    #[arg(long, env = "GAME_NAME", default_value = "chess")]
    game_name: String,

    /// Docker network shared by the clients and the game server
    #[arg(long, env = "GAME_SERVER_NETWORK", default_value = "bridge")]
    network: String,

    #[arg(long, env = "CLIENT_CPU_PERIOD", default_value_t = 100_000)]
    client_cpu_period: i64,

    #[arg(long, env = "CLIENT_CPU_QUOTA", default_value_t = 100_000)]
    client_cpu_quota: i64,

    /// Memory cap of each client, in bytes
    #[arg(long, env = "CLIENT_MEMORY", default_value_t = 512 * 1024 * 1024)]
    client_memory: i64,

    /// Memory plus swap cap of each client, in bytes (defaults to the memory cap)
    #[arg(long, env = "CLIENT_MEMORY_SWAP")]
    client_memory_swap: Option<i64>,

    #[arg(long, env = "CLIENT_USER", default_value = "nobody")]
    client_user: String,

    /// Wall-clock budget of each client, in seconds
    #[arg(long, env = "CLIENT_TIMEOUT", default_value_t = 300)]
    client_timeout: u64,

    #[arg(long, env = "RUNNER_QUEUE_LIMIT", default_value_t = 4)]
    queue_limit: usize,

    /// Delay between two claim attempts, in milliseconds
    #[arg(long, env = "RUNNER_POLL_INTERVAL", default_value_t = 100)]
    poll_interval: u64,

    /// Directory the submission logs are written to
    #[arg(long, env = "OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    #[arg(long, env = "LOG_URL_PREFIX", default_value = DEFAULT_LOG_URL_PREFIX)]
    log_url_prefix: String,

    /// Attempts at reaching the game server before giving up
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 5)]
    retry_attempts: u32,

    /// Delay between two attempts at reaching the game server, in milliseconds
    #[arg(long, env = "RETRY_TIMEOUT", default_value_t = 5000)]
    retry_timeout: u64,

    /// Port of the control API
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

impl Args {
    fn game_server_config(&self) -> GameServerConfig {
        GameServerConfig {
            hostname: self.game_server_host.clone(),
            game_port: self.game_server_game_port,
            api_port: self.game_server_api_port,
            game_name: self.game_name.clone(),
        }
    }

    fn container_limits(&self) -> ContainerLimits {
        ContainerLimits {
            cpu_period: self.client_cpu_period,
            cpu_quota: self.client_cpu_quota,
            memory: self.client_memory,
            memory_swap: self.client_memory_swap.unwrap_or(self.client_memory),
            network_mode: self.network.clone(),
            user: self.client_user.clone(),
            ..ContainerLimits::default()
        }
    }

    fn admission_config(&self) -> anyhow::Result<AdmissionConfig> {
        Ok(AdmissionConfig::new(
            self.queue_limit,
            Duration::from_millis(self.poll_interval),
        )?)
    }

    fn play_config(&self) -> PlayConfig {
        PlayConfig::new(&self.output_dir)
            .with_client_timeout(Duration::from_secs(self.client_timeout))
            .with_log_url_prefix(&self.log_url_prefix)
    }

    fn connect_options(&self) -> anyhow::Result<PgConnectOptions> {
        match &self.database_url {
            Some(url) => url.parse().context("invalid DATABASE_URL"),
            None => Ok(PgConnectOptions::new()
                .host(&self.postgres_host)
                .port(self.postgres_port)
                .username(&self.postgres_user)
                .password(&self.postgres_password)
                .database(&self.postgres_db)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("cannot create {}", args.output_dir.display()))?;

    let store = PgJobStore::connect_with(args.connect_options()?, args.postgres_max_connections)
        .await
        .context("cannot connect to the job store")?;
    let store: Arc<dyn JobStore> = Arc::new(store);

    let engine = Arc::new(DockerEngine::connect().context("cannot configure docker")?);

    let game_server = args.game_server_config();
    let results = GameServerClient::new(game_server.clone())?;
    info!(url = %game_server.api_base(), "waiting for game server");
    results
        .wait_until_ready(args.retry_attempts, Duration::from_millis(args.retry_timeout))
        .await
        .context("game server unreachable")?;

    store.ping().await.context("job store unreachable")?;

    let queue = GameQueue::new(Arc::clone(&store), args.admission_config()?)?;
    let player = Player::new(
        store,
        engine,
        Arc::new(results),
        game_server,
        args.container_limits(),
        args.play_config(),
    )?;
    let runner = Arc::new(Runner::new(queue, player));
    runner.start().await;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("cannot listen on port {}", args.port))?;
    info!(port = args.port, runner = %runner.id(), "listening");

    axum::serve(listener, api::router(Arc::clone(&runner)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runner.stop().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
