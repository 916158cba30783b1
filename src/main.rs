use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use clap::{Parser, Subcommand};
use document_analyzer::{bootstrap::Services, config::Config, create_router, utils::init_logger};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "document-analyzer", version, about = "Financial document analysis service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default). In queued mode an embedded worker runs too.
    Serve {
        /// Do not start the embedded worker.
        #[arg(long)]
        no_worker: bool,
    },
    /// Run only the queue worker.
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logger();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    match cli.command.unwrap_or(Command::Serve { no_worker: false }) {
        Command::Serve { no_worker } => serve(config, no_worker, shutdown).await,
        Command::Worker => run_worker(config, shutdown).await,
    }
}

async fn serve(config: Config, no_worker: bool, shutdown: CancellationToken) -> anyhow::Result<()> {
    let services = Services::initialize(config.clone()).await?;

    let worker = if no_worker { None } else { services.worker() };
    let worker_handle = worker.map(|worker| {
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    });

    let app = create_router(services.app_state());

    let ip = config
        .server
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid HOST: {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    // The server can also stop on its own; make sure the worker follows.
    shutdown.cancel();
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task failed");
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn run_worker(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    if config.database.url.is_none() {
        anyhow::bail!("DATABASE_URL is required to run a standalone worker");
    }
    if !config.redis.enabled {
        anyhow::bail!("USE_JOB_QUEUE must be enabled to run a standalone worker");
    }

    let services = Services::initialize(config).await?;
    let worker = services
        .worker()
        .context("Job queue is unavailable; nothing to consume")?;

    worker.run(shutdown).await;
    Ok(())
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}
