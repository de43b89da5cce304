//! empire-server - growth engine HTTP service
//!
//! Startup order: configuration, database (schema deployed on first start),
//! boot sequence (which initializes every enabled engine), HTTP listener.
//! SIGINT/SIGTERM stop the listener and cancel all background jobs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use empire_common::config::EmpireConfig;
use empire_server::mailer::LogMailer;
use empire_server::system::SystemStatus;
use empire_server::{build_router, db, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for empire-server
#[derive(Parser, Debug)]
#[command(name = "empire-server")]
#[command(about = "Growth engine service: forum, challenges, newsletter, UGC video")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "EMPIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL, overrides configuration and DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Initialize engines without starting their background jobs
    #[arg(long)]
    no_jobs: bool,
}

impl Args {
    fn apply(&self, config: &mut EmpireConfig) {
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_jobs {
            config.engines.run_jobs = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "empire_server=info,empire_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting empire-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let mut config = EmpireConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    let (pool, report) = db::deploy_schema(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    if !report.is_noop() {
        info!(
            "Schema deployed: {} tables created, {} columns added",
            report.created_tables.len(),
            report.added_columns.len()
        );
    }

    let state = AppState::new(&config, pool, Arc::new(LogMailer));

    let boot = state.boot.run().await;
    match boot.system_status {
        SystemStatus::Emergency => bail!("Boot sequence aborted in phase {}", boot.phase),
        SystemStatus::Critical => error!(
            "Boot finished with {} critical issues; serving with degraded engines",
            boot.critical_issues
        ),
        SystemStatus::Warning => warn!("Boot finished with {} warnings", boot.warning_issues),
        SystemStatus::Healthy => info!("Boot sequence healthy"),
    }

    if config.engines.run_jobs {
        state.start_maintenance();
    }

    let scheduler = state.scheduler.clone();
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("empire-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
