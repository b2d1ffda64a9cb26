use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use snmp_poller::config::{ConfigError, PollerConfig, TargetConfig};
use snmp_poller::poller::{Scheduler, SchedulerOptions};
use snmp_poller::secret::SecretString;
use snmp_poller::sink::{ConsoleSink, CsvLogSink, Sink, SinkDispatcher};
use snmp_poller::snmp::{PooledClient, QueryClient, SnmpClient};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_ERROR: u8 = 2;

fn init_logger() {
    // Use LOG_LEVEL env var (fall back to RUST_LOG)
    let filter = env::var("LOG_LEVEL")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&filter))
        .with_target(false)
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "snmp-poller")]
#[command(about = "Periodic SNMP poller for uptime, bandwidth and interface status", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: PollOptions,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Poll every target listed in a JSON configuration file
    Run {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Poll sysUpTime
    Uptime { host: String },
    /// Poll ifSpeed and the inbound bit rate of one interface
    Bandwidth { host: String, if_index: u32 },
    /// Poll the per-interval ipInReceives delta
    Delay { host: String },
    /// Poll admin and operational status of one interface
    Status { host: String, if_index: u32 },
    /// Poll sysDescr
    Sysinfo { host: String },
    /// Poll an arbitrary numeric OID
    Get { host: String, oid: String },
}

impl Command {
    /// Host and metric identifier for single-target commands
    fn single_target(&self) -> Option<(&str, String)> {
        match self {
            Self::Run { .. } => None,
            Self::Uptime { host } => Some((host, "uptime".to_string())),
            Self::Bandwidth { host, if_index } => Some((host, format!("bandwidth:{}", if_index))),
            Self::Delay { host } => Some((host, "delay".to_string())),
            Self::Status { host, if_index } => Some((host, format!("status:{}", if_index))),
            Self::Sysinfo { host } => Some((host, "sysinfo".to_string())),
            Self::Get { host, oid } => Some((host, oid.clone())),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
struct PollOptions {
    /// SNMP community string
    #[arg(
        long,
        global = true,
        env = "SNMP_COMMUNITY",
        hide_env_values = true,
        default_value = "public"
    )]
    community: String,

    /// SNMP version (1 or 2c)
    #[arg(long, global = true, default_value = "2c")]
    snmp_version: String,

    /// SNMP agent UDP port
    #[arg(long, global = true, default_value_t = 161)]
    port: u16,

    /// Polling interval in seconds
    #[arg(long, global = true, default_value_t = 5)]
    interval: u64,

    /// Per-query timeout in seconds
    #[arg(long, global = true, default_value_t = 5)]
    timeout: u64,

    /// Append samples to this delimited log file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Do not write the delimited log file
    #[arg(long, global = true, default_value_t = false, conflicts_with = "log_file")]
    no_log: bool,

    /// Keep one persistent SNMP session per target
    #[arg(long, global = true, default_value_t = false)]
    pooled: bool,
}

/// Build the poller configuration for the selected command
fn build_config(command: &Command, options: &PollOptions) -> Result<PollerConfig, ConfigError> {
    let mut config = if let Command::Run { config } = command {
        PollerConfig::load(config)?
    } else if let Some((host, metric)) = command.single_target() {
        let mut config = PollerConfig::single(TargetConfig {
            host: host.to_string(),
            port: options.port,
            community: SecretString::new(options.community.clone()),
            version: options.snmp_version.clone(),
            interval_secs: options.interval,
            metrics: vec![metric],
        });
        config.query_timeout_secs = options.timeout;
        config
    } else {
        return Err(ConfigError::NoTargets);
    };

    if let Some(path) = &options.log_file {
        config.log_path = Some(path.clone());
    }
    if options.no_log {
        config.log_path = None;
    }
    config.pooled_sessions |= options.pooled;

    // Surface every validation error before anything starts
    config.resolve()?;
    Ok(config)
}

fn main() -> ExitCode {
    init_logger();

    let args = Args::parse();

    let config = match build_config(&args.command, &args.options) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let grace = config.shutdown_grace();
    let result = runtime.block_on(run(config));
    // Hard stop for anything still stuck in a blocking SNMP call
    runtime.shutdown_timeout(grace);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            tracing::error!("Invalid configuration: {:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
        Err(e) => {
            tracing::error!("snmp-poller failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: PollerConfig) -> anyhow::Result<()> {
    tracing::info!("snmp-poller {} starting", env!("CARGO_PKG_VERSION"));

    let tasks = config.tasks(Instant::now())?;

    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if let Some(path) = &config.log_path {
        let csv = CsvLogSink::open(path)?;
        tracing::info!("Appending samples to {}", csv.path().display());
        sinks.push(Box::new(csv));
    }
    if config.console {
        sinks.push(Box::new(ConsoleSink::new()));
    }
    let dispatcher = SinkDispatcher::spawn(sinks, config.sink_capacity)
        .context("Failed to start sink dispatcher")?;

    let pool = config
        .pooled_sessions
        .then(|| PooledClient::with_timeout(config.query_timeout()));
    let client: Arc<dyn QueryClient> = match &pool {
        Some(pool) => Arc::new(pool.clone()),
        None => Arc::new(SnmpClient::with_timeout(config.query_timeout())),
    };

    tracing::info!(
        "Polling {} tasks across {} targets ({} sessions)",
        tasks.len(),
        config.targets.len(),
        if pool.is_some() { "pooled" } else { "per-request" }
    );

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);
    });

    let mut scheduler = Scheduler::new(
        tasks,
        client,
        dispatcher.handle(),
        SchedulerOptions::from_config(&config),
    );
    scheduler.run(shutdown_rx).await;

    dispatcher.shutdown(config.shutdown_grace()).await;
    if let Some(pool) = pool {
        pool.shutdown_all();
    }

    tracing::info!("Shutdown");
    Ok(())
}

/// Wait for SIGTERM or SIGINT shutdown signal.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
        tracing::info!("Received Ctrl+C");
    }
}
