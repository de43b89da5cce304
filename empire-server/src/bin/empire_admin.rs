//! Administrative one-shot commands
//!
//! **Usage:**
//! ```bash
//! empire-admin [--config <file>] [--database-url <url>] deploy-schema
//! empire-admin validate
//! empire-admin boot [--json]
//! ```
//!
//! Exits 0 on success and 1 on failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use empire_common::config::EmpireConfig;
use empire_common::db::{connect, SchemaVerifier};
use empire_server::mailer::LogMailer;
use empire_server::system::SystemStatus;
use empire_server::{db, AppState};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "empire-admin")]
#[command(about = "Schema deployment and diagnostics for empire-server")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "EMPIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL, overrides configuration and DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create missing tables and columns
    DeploySchema,
    /// Check that every table exists without changing anything
    Validate,
    /// Run the boot sequence once, without background jobs
    Boot {
        /// Print the full boot result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "empire_server=info,empire_common=info".into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded
async fn run(args: Args) -> Result<bool> {
    let mut config = EmpireConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    match args.command {
        Command::DeploySchema => {
            let (_pool, report) = db::deploy_schema(&config.database_url)
                .await
                .context("Schema deployment failed")?;
            info!(
                "Schema deployed to {}: {} tables created, {} columns added",
                config.database_url,
                report.created_tables.len(),
                report.added_columns.len()
            );
            Ok(true)
        }
        Command::Validate => {
            let pool = connect(&config.database_url).await.context("Failed to open database")?;
            let missing = SchemaVerifier::missing_tables(&pool, &db::all_table_names()).await?;
            if missing.is_empty() {
                info!("All {} tables present", db::all_table_names().len());
                Ok(true)
            } else {
                error!("Missing tables: {}. Run `empire-admin deploy-schema`.", missing.join(", "));
                Ok(false)
            }
        }
        Command::Boot { json } => {
            config.engines.run_jobs = false;
            let pool = connect(&config.database_url).await.context("Failed to open database")?;
            let state = AppState::new(&config, pool, Arc::new(LogMailer));

            let result = state.boot.run().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            info!(
                "Boot status: {} ({} critical, {} warnings)",
                result.system_status.as_str(),
                result.critical_issues,
                result.warning_issues
            );
            Ok(result.success && result.system_status != SystemStatus::Critical)
        }
    }
}
