use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod driver;
mod fixer;
mod git;
#[cfg(test)]
mod mock;
mod notifications;
mod registry;
mod scanner;
mod server;
mod supervisor;
mod testing;

use config::{Config, LoggingConfig};
use registry::FinalStatus;
use supervisor::RunRequest;

#[derive(Parser)]
#[command(name = "healer")]
#[command(
    author,
    version,
    about = "Autonomous CI healing - scan, fix, commit, test and retry against a repository"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to a healer.toml (defaults to ./healer.toml, then the user config dir)
    #[arg(short, long, global = true, env = "HEALER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,

    /// Heal one repository in the foreground, streaming its log trail
    Run {
        /// Repository URL to clone
        repo: String,

        /// Team name, used in the branch name
        #[arg(long)]
        team: String,

        /// Team leader, used in the branch name
        #[arg(long)]
        leader: String,

        /// Maximum number of fix/test iterations
        #[arg(short, long)]
        retry_limit: Option<u32>,
    },

    /// Show the persisted result of a finished run
    Status {
        /// Run identifier
        run_id: String,
    },

    /// Remove leftover run workspaces
    Clean {
        /// Also remove persisted result snapshots
        #[arg(long)]
        results: bool,
    },
}

/// Installs the tracing subscriber. The returned guard flushes the file log.
fn init_logging(verbose: bool, log_json: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("healer=debug")
        } else {
            EnvFilter::new("healer=info")
        }
    });

    let json = log_json || logging.json;
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    let (file_layer, guard) = match logging.dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "healer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let _guard = init_logging(cli.verbose, cli.log_json, &config.logging);

    match cli.command {
        Commands::Serve => {
            commands::serve::run(&config).await?;
        }
        Commands::Run {
            repo,
            team,
            leader,
            retry_limit,
        } => {
            let request = RunRequest {
                repo_url: repo,
                team_name: team,
                team_leader: leader,
                retry_limit,
            };
            let status = commands::run::run(&config, request).await?;
            if status != FinalStatus::Passed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status { run_id } => {
            commands::status::run(&config, &run_id).await?;
        }
        Commands::Clean { results } => {
            commands::clean::run(&config, results).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
