//! # hnpulse Server
//!
//! Serves the refresh API and progress stream, or runs a single guarded
//! refresh from the command line.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use hnpulse_core::{
    EventKind, EventLevel, FileCompletionLog, ItemId, JobRequest, SystemClock,
};
use hnpulse_server::{
    AppState,
    infra::{
        config::{Config, ConfigLoad, ConfigLoader},
        refresh::{CommandJob, Subscription},
        startup::{ProdStartupHooks, StartupHooks},
    },
    routes,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "hnpulse-server")]
#[command(
    about = "Refresh control plane for the Hacker News summary pipeline"
)]
struct Cli {
    /// Path to hnpulse.toml (overrides HNPULSE_CONFIG_PATH)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Load this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Do not start the daily scheduler
    #[arg(long, default_value_t = false)]
    no_schedule: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one guarded refresh in the foreground and exit
    RunOnce(RunOnceArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct RunOnceArgs {
    /// Summarize a single Hacker News item instead of the daily digest
    #[arg(long)]
    item_id: Option<String>,

    /// Article URL for the single item
    #[arg(long, requires = "item_id")]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(
        cli.config.as_ref(),
        cli.env_file.as_ref(),
        &cli.serve,
    )?;

    match cli.command {
        Some(Command::RunOnce(args)) => run_once(config, args).await,
        None => run_server(config).await,
    }
}

fn load_runtime_config(
    config_path: Option<&PathBuf>,
    env_file: Option<&PathBuf>,
    args: &ServeArgs,
) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if args.no_schedule {
        config.schedule.enabled = false;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        refresh.cooldown_secs = config.refresh.cooldown.as_secs(),
        refresh.adhoc_daily_limit = config.refresh.adhoc_daily_limit,
        schedule.enabled = config.schedule.enabled,
        schedule.window = %config.schedule.daily,
        pipeline.program = %config.pipeline.program,
        summaries = %config.storage.summaries_dir.display(),
        "refresh configuration in effect"
    );

    Ok(config)
}

fn build_state(config: Config) -> AppState {
    let completions =
        Arc::new(FileCompletionLog::new(&config.storage.summaries_dir));
    let job = Arc::new(CommandJob::new(config.pipeline.clone()));
    AppState::new(config, completions, job, Arc::new(SystemClock))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr =
        format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("invalid server address")?;
    let state = build_state(config);

    ProdStartupHooks
        .run(&state, state.shutdown.clone())
        .await
        .context("startup hooks failed")?;

    let app = routes::create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "hnpulse server listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    state.join_background().await;

    if state.guard.is_in_progress() {
        info!("waiting for the running refresh to finish");
        if tokio::time::timeout(SHUTDOWN_GRACE, state.runner.wait_idle())
            .await
            .is_err()
        {
            warn!("refresh still running after shutdown grace period");
        }
    }

    info!("hnpulse server stopped");
    Ok(())
}

async fn run_once(config: Config, args: RunOnceArgs) -> anyhow::Result<()> {
    let request = match args.item_id {
        Some(raw) => {
            let item = ItemId::parse(&raw).context("invalid --item-id")?;
            JobRequest::adhoc(item, args.url)
        }
        None => JobRequest::manual(),
    };
    let state = build_state(config);

    let subscription = state.hub.subscribe();
    let ticket = match state.runner.trigger(request) {
        Ok(ticket) => ticket,
        Err(denied) => bail!("refresh refused: {denied}"),
    };
    info!(run_id = %ticket.run_id, scope = %ticket.scope, "refresh started");

    let outcome = follow(&subscription).await;
    state.runner.wait_idle().await;

    match outcome {
        EventKind::Error => bail!("refresh failed"),
        _ => Ok(()),
    }
}

/// Logs hub frames until the run's terminal event and returns its kind.
async fn follow(subscription: &Subscription) -> EventKind {
    loop {
        let frame = subscription.recv().await;
        let event = &frame.event;
        match event.level {
            EventLevel::Error => error!(kind = ?event.kind, "{}", event.message),
            EventLevel::Warning => warn!(kind = ?event.kind, "{}", event.message),
            EventLevel::Debug => debug!(kind = ?event.kind, "{}", event.message),
            EventLevel::Info | EventLevel::Success => {
                info!(kind = ?event.kind, "{}", event.message)
            }
        }
        if event.is_terminal() {
            return event.kind;
        }
    }
}
