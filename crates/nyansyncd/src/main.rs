// # nyansyncd - panel DNS sync daemon
//
// This is a THIN integration layer. All scheduling, execution and store
// logic lives in nyansync-core; the daemon only:
//
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Wires the panel, Cloudflare and Telegram clients into the executor
// 4. Starts the scheduler and the control API, and reacts to signals
//
// ## Configuration
//
// - `NYANSYNC_CONFIG`: Path of the JSON config store (default `config.json`)
// - `NYANSYNC_LOG_LEVEL`: trace, debug, info, warn, error (default `info`)
// - `NYANSYNC_POOL_SIZE`: Concurrent runs across jobs, 1..=64 (default 10)
// - `NYANSYNC_REQUEST_TIMEOUT_SECS`: Per-request bound, 1..=30 (default 30)
// - `NYANSYNC_SHUTDOWN_GRACE_SECS`: Wait for in-flight runs, 1..=300 (default 30)
// - `NYANSYNC_MODE`: `live` (default) or `dry-run` (no DNS writes)
// - `NYANSYNC_CONTROL_ADDR`: Control API listen address (default `127.0.0.1:8080`,
//   `off` disables it)
//
// ## Signals
//
// - `SIGHUP`: re-read the config file and reconcile timers
// - `SIGINT` / `SIGTERM`: stop timers, let in-flight runs finish, exit
//
// ## Usage
//
// ```bash
// export NYANSYNC_CONFIG=/var/lib/nyansync/config.json
// nyansyncd              # run the scheduler
// nyansyncd run <job-id> # execute one job once and print its log
// ```

mod control;

use anyhow::Result;
use nyansync_account_http::NyanpassFactory;
use nyansync_core::{
    AdminService, Collaborators, EngineConfig, ExecutorConfig, FileConfigStore, JobExecutor,
    RunStatus, Scheduler, SchedulerConfig,
};
use nyansync_notify_telegram::TelegramFactory;
use nyansync_provider_cloudflare::CloudflareFactory;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Default control API address; loopback only
const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:8080";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// What the process was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Daemon,
    RunOnce(String),
}

impl Command {
    fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [] => Ok(Command::Daemon),
            [cmd, job_id] if cmd == "run" => Ok(Command::RunOnce(job_id.clone())),
            _ => anyhow::bail!("usage: nyansyncd [run <job-id>]"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
struct Config {
    store_path: PathBuf,
    log_level: String,
    pool_size: usize,
    request_timeout_secs: u64,
    shutdown_grace_secs: u64,
    dry_run: bool,
    control_addr: Option<SocketAddr>,
}

/// Parse an optional numeric variable
fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number. Got: '{}'", name, raw)),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let scheduler = SchedulerConfig::default();
        let executor = ExecutorConfig::default();

        let mode = lookup("NYANSYNC_MODE").unwrap_or_else(|| "live".to_string());
        let dry_run = match mode.trim().to_lowercase().as_str() {
            "live" | "" => false,
            "dry-run" => true,
            _ => anyhow::bail!(
                "NYANSYNC_MODE '{}' is not valid. Valid modes: live, dry-run",
                mode
            ),
        };

        let control = lookup("NYANSYNC_CONTROL_ADDR")
            .unwrap_or_else(|| DEFAULT_CONTROL_ADDR.to_string());
        let control_addr = match control.trim() {
            "" | "off" => None,
            addr => Some(addr.parse().map_err(|_| {
                anyhow::anyhow!(
                    "NYANSYNC_CONTROL_ADDR must be host:port or 'off'. Got: '{}'",
                    control
                )
            })?),
        };

        Ok(Self {
            store_path: lookup("NYANSYNC_CONFIG")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.json")),
            log_level: lookup("NYANSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            pool_size: parse_var(&lookup, "NYANSYNC_POOL_SIZE", scheduler.pool_size)?,
            request_timeout_secs: parse_var(
                &lookup,
                "NYANSYNC_REQUEST_TIMEOUT_SECS",
                executor.request_timeout_secs,
            )?,
            shutdown_grace_secs: parse_var(
                &lookup,
                "NYANSYNC_SHUTDOWN_GRACE_SECS",
                scheduler.shutdown_grace_secs,
            )?,
            dry_run,
            control_addr,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.pool_size) {
            anyhow::bail!(
                "NYANSYNC_POOL_SIZE must be between 1 and 64. Got: {}",
                self.pool_size
            );
        }

        if !(1..=30).contains(&self.request_timeout_secs) {
            anyhow::bail!(
                "NYANSYNC_REQUEST_TIMEOUT_SECS must be between 1 and 30 seconds. Got: {}",
                self.request_timeout_secs
            );
        }

        if !(1..=300).contains(&self.shutdown_grace_secs) {
            anyhow::bail!(
                "NYANSYNC_SHUTDOWN_GRACE_SECS must be between 1 and 300 seconds. Got: {}",
                self.shutdown_grace_secs
            );
        }

        // Check parent directory exists
        if let Some(parent) = self.store_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "NYANSYNC_CONFIG parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        self.level()?;
        self.engine_config().validate()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        Ok(match self.log_level.trim().to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "NYANSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        })
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scheduler: SchedulerConfig {
                pool_size: self.pool_size,
                shutdown_grace_secs: self.shutdown_grace_secs,
            },
            executor: ExecutorConfig {
                request_timeout_secs: self.request_timeout_secs,
                ..ExecutorConfig::default()
            },
        }
    }

    /// Client factories for the production collaborators
    fn collaborators(&self) -> Collaborators {
        let timeout = self.engine_config().executor.request_timeout();
        Collaborators {
            accounts: Arc::new(NyanpassFactory::new().with_timeout(timeout)),
            dns: Arc::new(
                CloudflareFactory::new()
                    .with_timeout(timeout)
                    .with_dry_run(self.dry_run),
            ),
            notifier: Arc::new(TelegramFactory::new().with_timeout(timeout)),
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = match Command::from_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let outcome = match command {
            Command::Daemon => run_daemon(config).await,
            Command::RunOnce(job_id) => run_once(config, &job_id).await,
        };
        match outcome {
            Ok(code) => code,
            Err(e) => {
                error!("Daemon error: {}", e);
                DaemonExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Run the scheduler until SIGINT/SIGTERM
async fn run_daemon(config: Config) -> Result<DaemonExitCode> {
    info!("Starting nyansyncd");
    if config.dry_run {
        warn!("Running in DRY-RUN mode - DNS records will not be changed");
    }

    let engine = config.engine_config();
    let store = Arc::new(FileConfigStore::open(&config.store_path).await?);
    let executor = Arc::new(JobExecutor::new(
        store.clone(),
        config.collaborators(),
        engine.executor.clone(),
    )?);
    let scheduler = Scheduler::new(executor, store.clone(), &engine.scheduler)?;

    let report = scheduler.reload_from_store().await?;
    info!(
        store = %store.path().display(),
        timers = report.started.len(),
        pool_size = engine.scheduler.pool_size,
        "Scheduler started"
    );

    let stop_control = CancellationToken::new();
    let control = match config.control_addr {
        Some(addr) => {
            let admin = Arc::new(AdminService::new(store.clone(), scheduler.clone()));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind control API on {}: {}", addr, e))?;
            info!("Control API listening on {}", addr);

            let stop = stop_control.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, control::router(admin))
                    .with_graceful_shutdown(async move { stop.cancelled().await })
                    .await
            }))
        }
        None => {
            info!("Control API disabled");
            None
        }
    };

    wait_for_shutdown(&scheduler, &store).await?;

    info!("Shutting down daemon");
    stop_control.cancel();
    if let Some(handle) = control {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Control API stopped with error: {}", e),
            Err(e) => warn!("Control API task failed: {}", e),
        }
    }
    if !scheduler.shutdown(engine.scheduler.shutdown_grace()).await {
        warn!("Some runs were still executing when the grace period ended");
    }
    Ok(DaemonExitCode::CleanShutdown)
}

/// Execute one job once and print its log
async fn run_once(config: Config, job_id: &str) -> Result<DaemonExitCode> {
    let engine = config.engine_config();
    let store = Arc::new(FileConfigStore::open(&config.store_path).await?);
    let executor = JobExecutor::new(store, config.collaborators(), engine.executor)?;

    let report = executor.run(job_id).await?;
    for line in &report.log {
        println!("{}", line);
    }

    Ok(match report.status {
        RunStatus::Succeeded => DaemonExitCode::CleanShutdown,
        RunStatus::Skipped => {
            eprintln!("job {} does not exist", job_id);
            DaemonExitCode::ConfigError
        }
        RunStatus::Failed(failure) => {
            eprintln!("run failed: {}", failure);
            DaemonExitCode::RuntimeError
        }
    })
}

/// Re-read the config file and reconcile timers; failures keep the current state
async fn reload(scheduler: &Scheduler, store: &FileConfigStore) {
    if let Err(e) = store.reload_from_disk().await {
        error!("Reload failed, keeping current config: {}", e);
        return;
    }
    if let Err(e) = scheduler.reload_from_store().await {
        error!("Timer reconciliation failed: {}", e);
    }
}

/// Serve SIGHUP reloads until SIGTERM or SIGINT arrives
#[cfg(unix)]
async fn wait_for_shutdown(scheduler: &Scheduler, store: &FileConfigStore) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading {}", store.path().display());
                reload(scheduler, store).await;
                continue;
            }
        };
        info!("Received shutdown signal: {}", name);
        return Ok(());
    }
}

/// Fallback for non-Unix platforms: CTRL-C only, no reload signal
#[cfg(not(unix))]
async fn wait_for_shutdown(_scheduler: &Scheduler, _store: &FileConfigStore) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    info!("Received shutdown signal: SIGINT");
    Ok(())
}
